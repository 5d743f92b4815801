//! Flush and live-tail polling decisions
//!
//! Both policies run on the streamer's logical clock: the sum of the deltas
//! passed to `tick`. They only answer "is it time?"; the streamer issues the
//! requests and reports back with the `mark_*` methods.

use std::time::Duration;

use crate::config::StreamerConfig;

/// Upload-side flush cadence.
#[derive(Debug, Clone)]
pub struct FlushPolicy {
    interval: Duration,
    max_buffered_bytes: Option<usize>,
    last_flush: Duration,
}

impl FlushPolicy {
    #[must_use]
    pub const fn new(interval: Duration, max_buffered_bytes: Option<usize>) -> Self {
        Self {
            interval,
            max_buffered_bytes,
            last_flush: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn from_config(config: &StreamerConfig) -> Self {
        Self::new(config.flush_interval(), config.flush_max_bytes)
    }

    /// A non-empty buffer is flushed once the interval has strictly elapsed,
    /// or as soon as it grows past the size limit.
    #[must_use]
    pub fn should_flush(&self, now: Duration, buffered: usize) -> bool {
        if buffered == 0 {
            return false;
        }
        if self.max_buffered_bytes.is_some_and(|max| buffered >= max) {
            return true;
        }
        now.saturating_sub(self.last_flush) > self.interval
    }

    pub fn mark_flushed(&mut self, now: Duration) {
        self.last_flush = now;
    }
}

/// Download-side view of the stream the poller decides on.
#[derive(Debug, Clone, Copy, Default)]
pub struct TailState {
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub live: bool,
    /// The reader consumed everything buffered so far.
    pub buffer_exhausted: bool,
    /// A high-priority window is waiting for more data.
    pub high_priority: bool,
}

impl TailState {
    /// The server told us about chunks we do not have yet.
    #[must_use]
    pub const fn definitely_more(&self) -> bool {
        self.chunk_index < self.total_chunks
    }

    /// A live writer may append more chunks at any time.
    #[must_use]
    pub const fn maybe_more(&self) -> bool {
        self.live
    }
}

/// Decides when to try the next chunk and when to re-poll the server.
#[derive(Debug, Clone)]
pub struct LiveTailPoller {
    chunk_interval: Duration,
    viewer_interval: Duration,
    checkpoint_interval: Duration,
    last_chunk: Duration,
    last_viewer: Duration,
    last_checkpoints: Duration,
}

impl LiveTailPoller {
    #[must_use]
    pub const fn new(
        chunk_interval: Duration,
        viewer_interval: Duration,
        checkpoint_interval: Duration,
    ) -> Self {
        Self {
            chunk_interval,
            viewer_interval,
            checkpoint_interval,
            last_chunk: Duration::ZERO,
            last_viewer: Duration::ZERO,
            last_checkpoints: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn from_config(config: &StreamerConfig) -> Self {
        Self::new(
            config.chunk_poll_interval(),
            config.viewer_refresh_interval(),
            config.checkpoint_refresh_interval(),
        )
    }

    /// Restart every cadence from `now`.
    pub fn reset(&mut self, now: Duration) {
        self.last_chunk = now;
        self.last_viewer = now;
        self.last_checkpoints = now;
    }

    /// Attempt the next chunk when the poll interval elapsed (live sessions
    /// may have grown), or right away when the reader needs data and the
    /// chunk is known to exist.
    #[must_use]
    pub fn should_download_chunk(&self, now: Duration, state: &TailState) -> bool {
        if !state.definitely_more() && !state.maybe_more() {
            return false;
        }
        let time_to_poll = now.saturating_sub(self.last_chunk) > self.chunk_interval;
        let urgent = (state.buffer_exhausted || state.high_priority) && state.definitely_more();
        time_to_poll || urgent
    }

    pub fn mark_chunk_requested(&mut self, now: Duration) {
        self.last_chunk = now;
    }

    #[must_use]
    pub fn should_refresh_viewer(&self, now: Duration) -> bool {
        now.saturating_sub(self.last_viewer) > self.viewer_interval
    }

    pub fn mark_viewer_refreshed(&mut self, now: Duration) {
        self.last_viewer = now;
    }

    /// Finished sessions have a fixed checkpoint set; only live ones are re-polled.
    #[must_use]
    pub fn should_enumerate_checkpoints(&self, now: Duration, live: bool) -> bool {
        live && now.saturating_sub(self.last_checkpoints) > self.checkpoint_interval
    }

    pub fn mark_checkpoints_enumerated(&mut self, now: Duration) {
        self.last_checkpoints = now;
    }
}
