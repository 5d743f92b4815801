//! Recording side: chunk flushes, checkpoints and events

use bytes::Bytes;
use tracing::{debug, warn};

use super::{SessionStreamer, StreamerState};
use crate::error::{Result, StreamerError};
use crate::request::Operation;

impl SessionStreamer {
    /// Upload whatever the stream archive holds as the next chunk.
    ///
    /// An empty archive is left alone: no request, same chunk index.
    pub fn flush_stream(&mut self) -> Result<()> {
        self.ensure_recording()?;
        self.flush_stream_inner();
        Ok(())
    }

    /// Upload the checkpoint archive, tagged with `time_ms`.
    ///
    /// The stream is flushed first so the checkpoint lines up with a chunk
    /// boundary; the checkpoint records the chunk index playback resumes from.
    pub fn flush_checkpoint(&mut self, time_ms: u32) -> Result<()> {
        self.ensure_recording()?;
        if self.session.is_none() {
            return Err(StreamerError::invalid("checkpoint before the session was assigned"));
        }
        if self.checkpoint.is_empty() {
            warn!(session = ?self.session, "flush_checkpoint with an empty checkpoint archive");
            return Ok(());
        }
        self.flush_stream_inner();
        self.flush_checkpoint_inner(time_ms);
        Ok(())
    }

    /// Record the total demo time; the current chunk covers up to it.
    pub fn update_total_demo_time(&mut self, time_ms: u32) {
        self.total_demo_time_ms = time_ms;
        self.range_end_ms = time_ms;
    }

    /// Attach a custom event to the recording.
    ///
    /// With a non-empty `name` the event id is `{session}_{name}`, so posting
    /// the same name again updates the event. The id is bound when the request
    /// runs, which may be before the session id is known here.
    pub fn add_or_update_event(
        &mut self,
        name: &str,
        group: &str,
        time1_ms: u32,
        time2_ms: u32,
        meta: &str,
        data: &[u8],
    ) -> Result<()> {
        self.ensure_recording()?;
        self.queue.enqueue(Operation::AddEvent {
            name: name.to_string(),
            group: group.to_string(),
            time1_ms,
            time2_ms,
            meta: meta.to_string(),
            body: Bytes::copy_from_slice(data),
        });
        Ok(())
    }

    pub(super) fn conditionally_flush_stream(&mut self) {
        if self.stop_requested {
            return;
        }
        if self.flush.should_flush(self.clock, self.stream.total_size()) {
            self.flush_stream_inner();
        }
    }

    pub(super) fn flush_stream_inner(&mut self) {
        if self.stream.is_empty() {
            return;
        }
        let body = self.stream.drain();
        let index = self.chunk_index;
        debug!(
            session = ?self.session,
            chunk_index = index,
            bytes = body.len(),
            range_start = self.range_start_ms,
            range_end = self.range_end_ms,
            "flushing stream chunk"
        );
        self.queue.enqueue(Operation::UploadChunk {
            index,
            num_chunks: index + 1,
            time_ms: self.total_demo_time_ms,
            range_start_ms: self.range_start_ms,
            range_end_ms: self.range_end_ms,
            body,
        });
        self.range_start_ms = self.range_end_ms;
        self.chunk_index += 1;
        self.flush.mark_flushed(self.clock);
    }

    pub(super) fn flush_checkpoint_inner(&mut self, time_ms: u32) {
        if self.checkpoint.is_empty() {
            return;
        }
        let body = self.checkpoint.drain();
        debug!(
            session = ?self.session,
            chunk_index = self.chunk_index,
            time_ms,
            bytes = body.len(),
            "flushing checkpoint"
        );
        self.queue.enqueue(Operation::UploadCheckpoint {
            time_ms,
            chunk_index: self.chunk_index,
            body,
        });
    }

    fn ensure_recording(&self) -> Result<()> {
        self.ensure_healthy()?;
        if self.state != StreamerState::StreamingUp {
            return Err(StreamerError::invalid("not recording"));
        }
        if self.stop_requested {
            return Err(StreamerError::invalid("stop already requested"));
        }
        Ok(())
    }
}
