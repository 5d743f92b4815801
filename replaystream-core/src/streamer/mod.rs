//! Session streamer
//!
//! Records a session to the replay service in chunks, or plays one back,
//! through a single-flight request queue. Nothing happens outside of
//! [`SessionStreamer::tick`]: transport calls run on runtime tasks and post
//! their completions to a channel that the next tick drains, so every state
//! change happens on the caller's thread in enqueue order.

mod completion;
mod download;
mod upload;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::archive::{ArchiveMode, ByteArchive};
use crate::checkpoint::{CheckpointIndex, CHECKPOINT_GROUP};
use crate::config::{Config, StreamerConfig};
use crate::error::{Result, StreamerError, TransportError};
use crate::policy::{FlushPolicy, LiveTailPoller};
use crate::queue::{RequestQueue, Ticket};
use crate::request::{Operation, PreProcess};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
use crate::wire::{ReplayApi, ReplaySummary, ReplayVersion, SessionQuery, UserList};

/// Lifecycle state of a streamer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamerState {
    #[default]
    Idle,
    StreamingUp,
    StreamingDown,
}

/// Resolution of [`SessionStreamer::start_streaming`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamReady {
    pub ready: bool,
    pub header_complete: bool,
}

/// Resolution of a checkpoint navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointReady {
    pub success: bool,
    /// Time left to fast-forward locally after loading the checkpoint, `-1` if none.
    pub residual_ms: i64,
}

impl CheckpointReady {
    const FAILED: Self = Self {
        success: false,
        residual_ms: -1,
    };
}

/// Result of a session enumeration.
pub type StreamList = std::result::Result<Vec<ReplaySummary>, StreamerError>;

struct Completion {
    ticket: Ticket,
    outcome: std::result::Result<HttpResponse, TransportError>,
}

/// Outstanding checkpoint navigation.
struct Navigation {
    reply: oneshot::Sender<CheckpointReady>,
    goto_time_ms: Option<u32>,
}

pub struct SessionStreamer {
    config: StreamerConfig,
    api: ReplayApi,
    transport: Arc<dyn HttpTransport>,
    runtime: Handle,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    queue: RequestQueue,

    state: StreamerState,
    session: Option<String>,
    viewer: Option<String>,
    last_error: Option<StreamerError>,
    stop_requested: bool,
    start_reply: Option<oneshot::Sender<StreamReady>>,
    header_complete: bool,
    navigation: Option<Navigation>,

    header: ByteArchive,
    stream: ByteArchive,
    checkpoint: ByteArchive,
    checkpoints: CheckpointIndex,

    chunk_index: u32,
    total_chunks: u32,
    total_demo_time_ms: u32,
    live: bool,
    range_start_ms: u32,
    range_end_ms: u32,
    high_priority_end_ms: Option<u32>,

    /// Logical clock, the sum of every `tick` delta.
    clock: Duration,
    flush: FlushPolicy,
    poller: LiveTailPoller,
}

impl fmt::Debug for SessionStreamer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStreamer")
            .field("state", &self.state)
            .field("session", &self.session)
            .field("viewer", &self.viewer)
            .field("chunk_index", &self.chunk_index)
            .field("total_chunks", &self.total_chunks)
            .field("live", &self.live)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

impl SessionStreamer {
    /// Create a streamer bound to the current tokio runtime.
    pub fn new(
        config: StreamerConfig,
        api: ReplayApi,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| {
            StreamerError::invalid("session streamer must be created inside a tokio runtime")
        })?;
        Ok(Self::with_runtime(config, api, transport, runtime))
    }

    /// Build the streamer and a `reqwest` transport from application config.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api = ReplayApi::new(&config.server.url)?;
        let transport = Arc::new(ReqwestTransport::new(&config.http)?);
        Self::new(config.streamer.clone(), api, transport)
    }

    pub fn with_runtime(
        config: StreamerConfig,
        api: ReplayApi,
        transport: Arc<dyn HttpTransport>,
        runtime: Handle,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let flush = FlushPolicy::from_config(&config);
        let poller = LiveTailPoller::from_config(&config);
        Self {
            config,
            api,
            transport,
            runtime,
            completions_tx,
            completions_rx,
            queue: RequestQueue::new(),
            state: StreamerState::Idle,
            session: None,
            viewer: None,
            last_error: None,
            stop_requested: false,
            start_reply: None,
            header_complete: false,
            navigation: None,
            header: ByteArchive::new(),
            stream: ByteArchive::new(),
            checkpoint: ByteArchive::new(),
            checkpoints: CheckpointIndex::new(),
            chunk_index: 0,
            total_chunks: 0,
            total_demo_time_ms: 0,
            live: false,
            range_start_ms: 0,
            range_end_ms: 0,
            high_priority_end_ms: None,
            clock: Duration::ZERO,
            flush,
            poller,
        }
    }

    // --- Lifecycle

    /// Begin recording (`recording == true`) or playing back session `name`.
    ///
    /// The returned receiver resolves once: after the header upload was
    /// acknowledged when recording, or after both the header and the
    /// checkpoint list were downloaded when playing back.
    pub fn start_streaming(
        &mut self,
        name: &str,
        friendly_name: &str,
        users: &[String],
        recording: bool,
        version: &ReplayVersion,
    ) -> Result<oneshot::Receiver<StreamReady>> {
        self.ensure_healthy()?;
        if self.is_streaming() || self.start_reply.is_some() {
            warn!(state = ?self.state, "start_streaming called while already streaming");
            return Err(StreamerError::invalid("a session is already active"));
        }
        if !recording && name.is_empty() {
            return Err(StreamerError::invalid("playback needs a session name"));
        }

        self.reset_session_state();
        let (tx, rx) = oneshot::channel();
        self.start_reply = Some(tx);

        if recording {
            self.set_archive_modes(ArchiveMode::Writing);
            self.state = StreamerState::StreamingUp;
            self.queue.enqueue(Operation::StartUpload {
                version: version.clone(),
                friendly_name: friendly_name.to_string(),
                meta: self.config.replay_meta.clone(),
                users: users.to_vec(),
            });
            self.queue.enqueue(Operation::UploadHeader);
            info!(app = %version.app, friendly_name, "starting upload");
        } else {
            self.set_archive_modes(ArchiveMode::Reading);
            self.state = StreamerState::StreamingDown;
            self.session = Some(name.to_string());
            self.queue.enqueue(Operation::StartDownload {
                user: users.first().cloned().unwrap_or_default(),
            });
            info!(session = name, "starting download");
        }
        Ok(rx)
    }

    /// Finish the current session.
    ///
    /// Playback deregisters the viewer; recording flushes the remaining data
    /// and closes the session on the server. The streamer goes idle once
    /// those requests went through. Stopping before the server assigned the
    /// session cancels everything instead and reports an error.
    pub fn stop_streaming(&mut self) -> Result<()> {
        if self.stop_requested {
            warn!(session = ?self.session, "stop_streaming called twice");
            return Err(StreamerError::invalid("stop already requested"));
        }
        if !self.is_streaming() {
            return Err(StreamerError::invalid("not streaming"));
        }

        if !self.session_established() {
            warn!(state = ?self.state, "stopping before the session was established, cancelling requests");
            let reason = StreamerError::invalid("stopped before the session was established");
            for op in self.queue.cancel_all() {
                op.abandon(&reason);
            }
            self.finish_stop();
            return Err(reason);
        }

        self.stop_requested = true;
        match self.state {
            StreamerState::StreamingDown => {
                self.queue.enqueue(Operation::RefreshViewer { is_final: true });
            }
            StreamerState::StreamingUp => {
                self.flush_stream_inner();
                self.flush_checkpoint_inner(self.total_demo_time_ms);
                self.queue.enqueue(Operation::StopUpload {
                    num_chunks: self.chunk_index,
                    time_ms: self.total_demo_time_ms,
                });
            }
            StreamerState::Idle => {}
        }
        self.queue.enqueue(Operation::StopStreaming);
        info!(session = ?self.session, "stop requested");
        Ok(())
    }

    /// Advance the streamer by `delta`.
    ///
    /// Applies finished requests, then either starts the next queued request
    /// or runs the flush / polling policies when the queue is idle.
    pub fn tick(&mut self, delta: Duration) {
        self.clock += delta;
        self.drain_completions();

        if self.queue.is_in_flight() {
            return;
        }
        if self.process_next_request() {
            return;
        }

        match self.state {
            StreamerState::StreamingUp => self.conditionally_flush_stream(),
            StreamerState::StreamingDown => self.tick_download(),
            StreamerState::Idle => {}
        }
    }

    // --- Session enumeration

    /// List sessions recorded for `version`, optionally filtered by user and meta.
    pub fn enumerate_streams(
        &mut self,
        version: &ReplayVersion,
        user: Option<&str>,
        meta: Option<&str>,
    ) -> oneshot::Receiver<StreamList> {
        let query = SessionQuery {
            user: user.map(str::to_string),
            meta: meta.map(str::to_string),
            recent_viewer: None,
        };
        self.enqueue_enumeration(version, query)
    }

    /// List sessions `viewer` watched recently.
    pub fn enumerate_recent_streams(
        &mut self,
        version: &ReplayVersion,
        viewer: &str,
    ) -> oneshot::Receiver<StreamList> {
        let query = SessionQuery {
            recent_viewer: Some(viewer.to_string()),
            ..SessionQuery::default()
        };
        self.enqueue_enumeration(version, query)
    }

    fn enqueue_enumeration(
        &mut self,
        version: &ReplayVersion,
        query: SessionQuery,
    ) -> oneshot::Receiver<StreamList> {
        let (reply, rx) = oneshot::channel();
        self.queue.enqueue(Operation::EnumerateSessions {
            version: version.clone(),
            query,
            reply,
        });
        rx
    }

    // --- Archives

    pub fn header_archive(&mut self) -> &mut ByteArchive {
        &mut self.header
    }

    pub fn streaming_archive(&mut self) -> &mut ByteArchive {
        &mut self.stream
    }

    /// `None` while recording until the server assigned the session id.
    pub fn checkpoint_archive(&mut self) -> Option<&mut ByteArchive> {
        if self.state == StreamerState::StreamingUp && self.session.is_none() {
            return None;
        }
        Some(&mut self.checkpoint)
    }

    // --- Accessors

    #[must_use]
    pub const fn state(&self) -> StreamerState {
        self.state
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.state != StreamerState::Idle
    }

    #[must_use]
    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    #[must_use]
    pub fn viewer(&self) -> Option<&str> {
        self.viewer.as_deref()
    }

    /// Sticky failure; once set the streamer must be recreated.
    #[must_use]
    pub const fn last_error(&self) -> Option<&StreamerError> {
        self.last_error.as_ref()
    }

    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.live
    }

    #[must_use]
    pub const fn is_loading_checkpoint(&self) -> bool {
        self.navigation.is_some()
    }

    #[must_use]
    pub fn has_pending_requests(&self) -> bool {
        self.queue.has_pending()
    }

    /// Next chunk to upload or download.
    #[must_use]
    pub const fn chunk_index(&self) -> u32 {
        self.chunk_index
    }

    #[must_use]
    pub const fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    #[must_use]
    pub const fn total_demo_time_ms(&self) -> u32 {
        self.total_demo_time_ms
    }

    /// Time range covered by the buffered stream data.
    #[must_use]
    pub const fn stream_time_range(&self) -> (u32, u32) {
        (self.range_start_ms, self.range_end_ms)
    }

    #[must_use]
    pub const fn checkpoints(&self) -> &CheckpointIndex {
        &self.checkpoints
    }

    #[must_use]
    pub const fn config(&self) -> &StreamerConfig {
        &self.config
    }

    // --- Queue processing

    fn drain_completions(&mut self) {
        while let Ok(Completion { ticket, outcome }) = self.completions_rx.try_recv() {
            let Some(op) = self.queue.finish(ticket) else {
                debug!(ticket, "dropping completion of a cancelled request");
                continue;
            };
            let kind = op.kind();
            let result = outcome.map_err(StreamerError::from).and_then(|response| {
                if response.is_ok() {
                    Ok(response)
                } else {
                    Err(StreamerError::unavailable(format!(
                        "{kind} returned HTTP {}",
                        response.status
                    )))
                }
            });
            self.on_complete(op, result);
        }
    }

    /// Pop the head of the queue. Returns `false` when the queue was empty.
    fn process_next_request(&mut self) -> bool {
        let Some(op) = self.queue.dequeue() else {
            return false;
        };
        match self.pre_process(&op) {
            PreProcess::Execute => self.execute(op),
            PreProcess::Defer => self.queue.push_front(op),
            PreProcess::Complete => {}
        }
        true
    }

    fn pre_process(&mut self, op: &Operation) -> PreProcess {
        match op {
            Operation::UploadHeader => {
                if self.session.is_none() {
                    return PreProcess::Defer;
                }
                if !self.header.is_empty() {
                    return PreProcess::Execute;
                }
                if self.stop_requested {
                    warn!(session = ?self.session, "stopping without a header, skipping header upload");
                    self.resolve_start(false);
                    return PreProcess::Complete;
                }
                PreProcess::Defer
            }
            Operation::StopStreaming => {
                self.finish_stop();
                PreProcess::Complete
            }
            _ => PreProcess::Execute,
        }
    }

    fn execute(&mut self, op: Operation) {
        let request = match self.build_request(&op) {
            Ok(request) => request,
            Err(e) => {
                self.on_complete(op, Err(e));
                return;
            }
        };
        debug!(kind = %op.kind(), method = %request.method, url = %request.url, "dispatching request");

        let ticket = self.queue.begin(op);
        let transport = Arc::clone(&self.transport);
        let completions = self.completions_tx.clone();
        let task = self.runtime.spawn(async move {
            let outcome = transport.execute(request).await;
            // The receiver lives as long as the streamer.
            let _ = completions.send(Completion { ticket, outcome });
        });
        self.queue.attach(ticket, task);
    }

    /// Bind session, viewer and payload into the outbound request.
    fn build_request(&mut self, op: &Operation) -> Result<HttpRequest> {
        let request = match op {
            Operation::StartUpload {
                version,
                friendly_name,
                meta,
                users,
            } => {
                let url = self.api.start_upload(version, friendly_name, meta.as_deref());
                let request = HttpRequest::post(url);
                if users.is_empty() {
                    request
                } else {
                    let body = serde_json::to_string(&UserList {
                        users: users.clone(),
                    })
                    .map_err(|e| StreamerError::invalid(format!("encoding user list: {e}")))?;
                    request.with_json(body)
                }
            }
            Operation::UploadHeader => {
                let session = self.require_session()?;
                let url = self.api.upload_header(&session, self.chunk_index, self.total_demo_time_ms);
                self.header_complete = true;
                HttpRequest::post(url).with_body(self.header.drain())
            }
            Operation::UploadChunk {
                index,
                num_chunks,
                time_ms,
                range_start_ms,
                range_end_ms,
                body,
            } => {
                let session = self.require_session()?;
                let url = self.api.upload_chunk(
                    &session,
                    *index,
                    *num_chunks,
                    *time_ms,
                    *range_start_ms,
                    *range_end_ms,
                );
                HttpRequest::post(url).with_body(body.clone())
            }
            Operation::StopUpload {
                num_chunks,
                time_ms,
            } => {
                let session = self.require_session()?;
                HttpRequest::post(self.api.stop_upload(&session, *num_chunks, *time_ms))
            }
            Operation::StartDownload { user } => {
                let session = self.require_session()?;
                HttpRequest::post(self.api.start_download(&session, user))
            }
            Operation::DownloadHeader => {
                let session = self.require_session()?;
                HttpRequest::get(self.api.download_header(&session))
            }
            Operation::DownloadChunk { index } => {
                let session = self.require_session()?;
                HttpRequest::get(self.api.download_chunk(&session, *index))
            }
            Operation::RefreshViewer { is_final } => {
                let session = self.require_session()?;
                let viewer = self
                    .viewer
                    .clone()
                    .ok_or_else(|| StreamerError::invalid("no viewer registered"))?;
                HttpRequest::post(self.api.refresh_viewer(&session, &viewer, *is_final))
            }
            Operation::EnumerateSessions { version, query, .. } => {
                HttpRequest::get(self.api.enumerate_sessions(version, query))
            }
            Operation::EnumerateCheckpoints => {
                let session = self.require_session()?;
                HttpRequest::get(self.api.enumerate_events(&session, CHECKPOINT_GROUP))
            }
            Operation::UploadCheckpoint {
                time_ms,
                chunk_index,
                body,
            } => {
                let session = self.require_session()?;
                let url = self.api.upload_event(
                    &session,
                    None,
                    CHECKPOINT_GROUP,
                    *time_ms,
                    *time_ms,
                    &chunk_index.to_string(),
                );
                HttpRequest::post(url).with_body(body.clone())
            }
            Operation::DownloadCheckpoint { record, .. } => {
                let session = self.require_session()?;
                HttpRequest::get(self.api.download_event(&session, &record.id))
            }
            Operation::AddEvent {
                name,
                group,
                time1_ms,
                time2_ms,
                meta,
                body,
            } => {
                let session = self.require_session()?;
                let event_id = (!name.is_empty()).then(|| format!("{session}_{name}"));
                let url = self.api.upload_event(
                    &session,
                    event_id.as_deref(),
                    group,
                    *time1_ms,
                    *time2_ms,
                    meta,
                );
                HttpRequest::post(url).with_body(body.clone())
            }
            Operation::StopStreaming => {
                return Err(StreamerError::invalid("stop_streaming has no request"));
            }
        };
        Ok(request)
    }

    fn require_session(&self) -> Result<String> {
        self.session
            .clone()
            .ok_or_else(|| StreamerError::invalid("no session assigned"))
    }

    // --- State helpers

    fn ensure_healthy(&self) -> Result<()> {
        match &self.last_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// The server knows about this client: a session id while recording, a
    /// viewer id while playing back.
    fn session_established(&self) -> bool {
        match self.state {
            StreamerState::StreamingUp => self.session.is_some(),
            StreamerState::StreamingDown => self.viewer.is_some(),
            StreamerState::Idle => false,
        }
    }

    fn resolve_start(&mut self, ready: bool) {
        if let Some(reply) = self.start_reply.take() {
            let _ = reply.send(StreamReady {
                ready,
                header_complete: self.header_complete,
            });
        }
    }

    fn resolve_navigation(&mut self, result: CheckpointReady) {
        if let Some(nav) = self.navigation.take() {
            let _ = nav.reply.send(result);
        }
    }

    /// Latch a hard failure: cancel everything, fail pending deferreds, go idle.
    fn latch(&mut self, err: StreamerError) {
        error!(session = ?self.session, state = ?self.state, error = %err, "streamer failed");
        for op in self.queue.cancel_all() {
            op.abandon(&err);
        }
        self.resolve_start(false);
        self.resolve_navigation(CheckpointReady::FAILED);
        self.state = StreamerState::Idle;
        self.session = None;
        self.viewer = None;
        self.stop_requested = false;
        if self.last_error.is_none() {
            self.last_error = Some(err);
        }
    }

    /// Terminal transition back to idle.
    fn finish_stop(&mut self) {
        self.resolve_start(false);
        self.resolve_navigation(CheckpointReady::FAILED);
        info!(session = ?self.session, chunks = self.chunk_index, "streaming stopped");
        self.state = StreamerState::Idle;
        self.session = None;
        self.viewer = None;
        self.stop_requested = false;
        self.live = false;
    }

    fn set_archive_modes(&mut self, mode: ArchiveMode) {
        self.header.set_mode(mode);
        self.stream.set_mode(mode);
        self.checkpoint.set_mode(mode);
    }

    fn reset_session_state(&mut self) {
        self.header.reset();
        self.stream.reset();
        self.checkpoint.reset();
        self.checkpoints = CheckpointIndex::new();
        self.session = None;
        self.viewer = None;
        self.stop_requested = false;
        self.header_complete = false;
        self.navigation = None;
        self.chunk_index = 0;
        self.total_chunks = 0;
        self.total_demo_time_ms = 0;
        self.live = false;
        self.range_start_ms = 0;
        self.range_end_ms = 0;
        self.high_priority_end_ms = None;
        self.flush.mark_flushed(self.clock);
        self.poller.reset(self.clock);
    }
}

impl Drop for SessionStreamer {
    fn drop(&mut self) {
        let reason = StreamerError::invalid("session streamer dropped");
        let cancelled = self.queue.cancel_all();
        if !cancelled.is_empty() {
            debug!(session = ?self.session, requests = cancelled.len(), "cancelling requests on drop");
        }
        for op in cancelled {
            op.abandon(&reason);
        }
    }
}
