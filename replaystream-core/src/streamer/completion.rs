//! Completion handlers
//!
//! Called from `tick` after the in-flight slot was released. Handlers apply
//! state changes and may enqueue follow-up work, but never start a request.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tracing::{debug, info, trace, warn};

use super::{CheckpointReady, SessionStreamer};
use crate::checkpoint::{CheckpointRecord, CHECKPOINT_GROUP};
use crate::error::{Result, StreamerError};
use crate::request::{Operation, RequestKind};
use crate::transport::HttpResponse;
use crate::wire::{ChunkHeaders, EventList, ReplayList, StartDownloadResponse, StartUploadResponse};

fn parse_json<T: DeserializeOwned>(kind: RequestKind, body: &Bytes) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| StreamerError::unavailable(format!("{kind}: malformed response: {e}")))
}

impl SessionStreamer {
    pub(super) fn on_complete(&mut self, op: Operation, result: Result<HttpResponse>) {
        let kind = op.kind();
        trace!(%kind, ok = result.is_ok(), "request finished");

        match op {
            Operation::StartUpload { .. } => self.on_upload_started(result),
            Operation::UploadHeader => match result {
                Ok(_) => {
                    info!(session = ?self.session, "header uploaded, recording is ready");
                    self.resolve_start(true);
                }
                Err(e) => self.latch(e),
            },
            Operation::UploadChunk { index, .. } => match result {
                Ok(_) => debug!(session = ?self.session, chunk_index = index, "chunk uploaded"),
                Err(e) => self.latch(e),
            },
            Operation::UploadCheckpoint { chunk_index, .. } => match result {
                Ok(_) => debug!(session = ?self.session, chunk_index, "checkpoint uploaded"),
                Err(e) => self.latch(e),
            },
            Operation::AddEvent { name, group, .. } => match result {
                Ok(_) => debug!(session = ?self.session, %name, %group, "event stored"),
                Err(e) => self.latch(e),
            },
            Operation::StopUpload { num_chunks, .. } => {
                match result {
                    Ok(_) => info!(session = ?self.session, num_chunks, "upload closed"),
                    Err(e) => self.latch(e),
                }
                self.stream.reset();
                self.chunk_index = 0;
            }
            Operation::StartDownload { .. } => self.on_download_started(result),
            Operation::DownloadHeader => match result {
                Ok(response) => {
                    debug!(session = ?self.session, bytes = response.body.len(), "header downloaded");
                    self.header.replace(&response.body);
                    self.header_complete = true;
                }
                Err(e) => self.latch(e),
            },
            Operation::DownloadChunk { index } => self.on_chunk_downloaded(index, result),
            Operation::RefreshViewer { is_final } => match result {
                Ok(_) => trace!(viewer = ?self.viewer, is_final, "viewer refreshed"),
                Err(e) if is_final => {
                    warn!(viewer = ?self.viewer, error = %e, "final viewer refresh failed");
                }
                Err(e) => self.latch(e),
            },
            Operation::EnumerateSessions { reply, .. } => {
                let streams = result
                    .and_then(|response| parse_json::<ReplayList>(kind, &response.body))
                    .map(|list| list.replays);
                if let Err(e) = &streams {
                    warn!(error = %e, "session enumeration failed");
                }
                let _ = reply.send(streams);
            }
            Operation::EnumerateCheckpoints => self.on_checkpoints_enumerated(result),
            Operation::DownloadCheckpoint { index, record } => {
                self.on_checkpoint_downloaded(index, &record, result);
            }
            Operation::StopStreaming => {
                warn!("stop_streaming never goes in flight");
            }
        }
    }

    fn on_upload_started(&mut self, result: Result<HttpResponse>) {
        let started = result.and_then(|response| {
            parse_json::<StartUploadResponse>(RequestKind::StartUpload, &response.body)
        });
        match started {
            Ok(body) if !body.session_id.is_empty() => {
                info!(session = %body.session_id, "upload session assigned");
                self.session = Some(body.session_id);
            }
            Ok(_) => self.latch(StreamerError::unavailable("server assigned an empty session id")),
            Err(e) => self.latch(e),
        }
    }

    fn on_download_started(&mut self, result: Result<HttpResponse>) {
        let started = result.and_then(|response| {
            parse_json::<StartDownloadResponse>(RequestKind::StartDownload, &response.body)
        });
        let body = match started {
            Ok(body) => body,
            Err(e) => return self.latch(e),
        };

        self.live = body.is_live();
        self.total_chunks = body.num_chunks;
        self.total_demo_time_ms = body.time;
        info!(
            session = ?self.session,
            viewer = %body.viewer_id,
            live = self.live,
            total_chunks = self.total_chunks,
            demo_time_ms = self.total_demo_time_ms,
            "download session opened"
        );

        if self.total_chunks == 0 && !self.live {
            return self.latch(StreamerError::unavailable("session has no chunks"));
        }

        self.viewer = Some(body.viewer_id);
        self.poller.reset(self.clock);
        self.queue.enqueue(Operation::DownloadHeader);
        self.queue.enqueue(Operation::EnumerateCheckpoints);
    }

    fn on_checkpoints_enumerated(&mut self, result: Result<HttpResponse>) {
        let events = result.and_then(|response| {
            if response.body.is_empty() {
                // nothing recorded yet
                Ok(EventList::default())
            } else {
                parse_json::<EventList>(RequestKind::EnumerateCheckpoints, &response.body)
            }
        });
        match events {
            Ok(list) => {
                let records: Vec<CheckpointRecord> = list
                    .events
                    .into_iter()
                    .filter(|e| e.group.is_empty() || e.group == CHECKPOINT_GROUP)
                    .map(CheckpointRecord::from)
                    .collect();
                debug!(session = ?self.session, count = records.len(), "checkpoints enumerated");
                self.checkpoints.replace(records);
                if self.start_reply.is_some() {
                    info!(session = ?self.session, "playback is ready");
                    self.resolve_start(true);
                }
            }
            Err(e) => self.latch(e),
        }
    }

    fn on_chunk_downloaded(&mut self, index: u32, result: Result<HttpResponse>) {
        if index != self.chunk_index {
            debug!(index, expected = self.chunk_index, "discarding chunk from before a seek");
            return;
        }

        let response = match result {
            Ok(response) => response,
            Err(e) if self.live => {
                warn!(session = ?self.session, chunk_index = index, error = %e, "chunk download failed, no longer treating stream as live");
                self.live = false;
                return;
            }
            Err(e) => return self.latch(e),
        };

        let headers = ChunkHeaders::from_response(&response);
        self.total_chunks = headers.num_chunks;
        self.total_demo_time_ms = headers.time_ms;
        self.live = headers.live;

        if response.body.is_empty() {
            if self.live {
                trace!(chunk_index = index, "no new data at the live edge");
            } else if index >= self.total_chunks {
                info!(session = ?self.session, total_chunks = self.total_chunks, "live session finished");
            } else {
                self.latch(StreamerError::unavailable(format!("chunk {index} is empty")));
            }
            return;
        }

        if self.stream.is_empty() {
            self.range_start_ms = headers.range_start_ms;
        }
        self.range_end_ms = headers.range_end_ms;
        self.stream.append(&response.body);
        self.chunk_index += 1;
        debug!(
            session = ?self.session,
            chunk_index = self.chunk_index,
            total_chunks = self.total_chunks,
            live = self.live,
            range_start = self.range_start_ms,
            range_end = self.range_end_ms,
            "chunk downloaded"
        );
    }

    fn on_checkpoint_downloaded(
        &mut self,
        index: usize,
        record: &CheckpointRecord,
        result: Result<HttpResponse>,
    ) {
        let goto_time_ms = self.navigation.as_ref().and_then(|nav| nav.goto_time_ms);
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(index, checkpoint = %record.id, error = %e, "checkpoint download failed");
                return self.resolve_navigation(CheckpointReady::FAILED);
            }
        };
        if response.body.is_empty() {
            warn!(index, checkpoint = %record.id, "checkpoint is empty");
            return self.resolve_navigation(CheckpointReady::FAILED);
        }
        let Some(resume_chunk) = record.resume_chunk else {
            warn!(index, metadata = %record.metadata, "checkpoint metadata is not a chunk index");
            return self.resolve_navigation(CheckpointReady::FAILED);
        };

        self.checkpoint.replace(&response.body);
        self.rewind_stream(resume_chunk);

        let residual_ms = match goto_time_ms {
            Some(time_ms) => {
                self.high_priority_end_ms = Some(time_ms);
                i64::from(time_ms) - i64::from(record.time_start_ms)
            }
            None => -1,
        };
        info!(index, chunk_index = resume_chunk, residual_ms, "checkpoint loaded");
        self.resolve_navigation(CheckpointReady {
            success: true,
            residual_ms,
        });
    }
}
