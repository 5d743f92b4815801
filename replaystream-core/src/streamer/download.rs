//! Playback side: live-tail polling, seeking and data availability

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::{CheckpointReady, Navigation, SessionStreamer, StreamerState};
use crate::checkpoint::CheckpointTarget;
use crate::error::{Result, StreamerError};
use crate::policy::TailState;
use crate::request::Operation;

impl SessionStreamer {
    /// Jump to a checkpoint. [`CheckpointTarget::Start`] rewinds to the
    /// beginning of the session without a network call and resolves at once.
    pub fn goto_checkpoint_index(
        &mut self,
        target: impl Into<CheckpointTarget>,
    ) -> Result<oneshot::Receiver<CheckpointReady>> {
        self.begin_navigation(target.into(), None)
    }

    /// Jump to `time_ms` through the latest checkpoint at or before it.
    ///
    /// The residual time reported on success is what the caller has to
    /// fast-forward locally. Until the stream is buffered up to `time_ms`
    /// no data is reported as available.
    pub fn goto_time_ms(&mut self, time_ms: u32) -> Result<oneshot::Receiver<CheckpointReady>> {
        self.ensure_navigable()?;
        let target = self.checkpoints.resolve_time(time_ms);
        debug!(time_ms, target = target.as_i64(), "resolved seek target");
        self.begin_navigation(target, Some(time_ms))
    }

    /// Hold back data until the stream is buffered up to `end_ms`.
    /// An `end_ms` of zero clears the window.
    pub fn set_high_priority_time_range(&mut self, start_ms: u32, end_ms: u32) {
        debug!(start_ms, end_ms, "high priority window");
        self.high_priority_end_ms = (end_ms > 0).then_some(end_ms);
    }

    /// Buffered stream bytes are ready to be read.
    #[must_use]
    pub fn is_data_available(&self) -> bool {
        self.can_serve_data()
            && self.stream.is_reading()
            && self.stream.remaining() > 0
            && self.total_chunks > 0
    }

    /// The buffered stream covers `[start_ms, end_ms]`.
    #[must_use]
    pub fn is_data_available_for_time_range(&self, start_ms: u32, end_ms: u32) -> bool {
        self.can_serve_data() && start_ms >= self.range_start_ms && end_ms <= self.range_end_ms
    }

    /// Consumers are held off while failed, seeking, or filling a high-priority window.
    fn can_serve_data(&self) -> bool {
        self.last_error.is_none() && self.navigation.is_none() && self.high_priority_end_ms.is_none()
    }

    fn ensure_navigable(&self) -> Result<()> {
        self.ensure_healthy()?;
        if self.state != StreamerState::StreamingDown {
            return Err(StreamerError::invalid("not playing back"));
        }
        if self.stop_requested {
            return Err(StreamerError::invalid("stop already requested"));
        }
        if self.navigation.is_some() {
            warn!(session = ?self.session, "busy loading another checkpoint");
            return Err(StreamerError::invalid("another checkpoint navigation is outstanding"));
        }
        Ok(())
    }

    fn begin_navigation(
        &mut self,
        target: CheckpointTarget,
        goto_time_ms: Option<u32>,
    ) -> Result<oneshot::Receiver<CheckpointReady>> {
        self.ensure_navigable()?;
        let (tx, rx) = oneshot::channel();

        match target {
            CheckpointTarget::Start => {
                self.checkpoint.reset();
                self.rewind_stream(0);
                if let Some(time_ms) = goto_time_ms.filter(|t| *t > 0) {
                    self.high_priority_end_ms = Some(time_ms);
                }
                info!(session = ?self.session, "rewound to the start of the session");
                let _ = tx.send(CheckpointReady {
                    success: true,
                    residual_ms: goto_time_ms.map_or(-1, i64::from),
                });
            }
            CheckpointTarget::Index(index) => {
                let record = self.checkpoints.get(index).cloned().ok_or_else(|| {
                    StreamerError::invalid(format!(
                        "checkpoint {index} out of range ({} known)",
                        self.checkpoints.len()
                    ))
                })?;
                info!(session = ?self.session, index, checkpoint = %record.id, "loading checkpoint");
                self.queue.enqueue(Operation::DownloadCheckpoint { index, record });
                self.navigation = Some(Navigation {
                    reply: tx,
                    goto_time_ms,
                });
            }
        }
        Ok(rx)
    }

    /// Drop the buffered stream and continue downloading from `chunk_index`.
    pub(super) fn rewind_stream(&mut self, chunk_index: u32) {
        self.stream.reset();
        self.range_start_ms = 0;
        self.range_end_ms = 0;
        self.chunk_index = chunk_index;
    }

    pub(super) fn tick_download(&mut self) {
        if let Some(end) = self.high_priority_end_ms {
            // At the live edge the window may reach past anything recorded so far.
            if self.range_end_ms >= end || !self.tail_state().definitely_more() {
                debug!(end, range_end = self.range_end_ms, "high priority window filled");
                self.high_priority_end_ms = None;
            }
        }

        if self.chunk_index >= self.total_chunks && !self.live {
            self.stream.set_end_of_data(true);
        }

        if self.viewer.is_some() && self.poller.should_refresh_viewer(self.clock) {
            self.queue.enqueue(Operation::RefreshViewer { is_final: false });
            self.poller.mark_viewer_refreshed(self.clock);
        }

        self.conditionally_download_next_chunk();

        if self.poller.should_enumerate_checkpoints(self.clock, self.live) {
            self.queue.enqueue(Operation::EnumerateCheckpoints);
            self.poller.mark_checkpoints_enumerated(self.clock);
        }
    }

    fn conditionally_download_next_chunk(&mut self) {
        if self.navigation.is_some() {
            return;
        }
        let state = self.tail_state();
        if self.poller.should_download_chunk(self.clock, &state) {
            self.queue.enqueue(Operation::DownloadChunk {
                index: self.chunk_index,
            });
            self.poller.mark_chunk_requested(self.clock);
        }
    }

    fn tail_state(&self) -> TailState {
        TailState {
            chunk_index: self.chunk_index,
            total_chunks: self.total_chunks,
            live: self.live,
            buffer_exhausted: self.stream.remaining() == 0,
            high_priority: self
                .high_priority_end_ms
                .is_some_and(|end| self.range_end_ms < end),
        }
    }
}
