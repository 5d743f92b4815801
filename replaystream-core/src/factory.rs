//! Streamer factory
//!
//! Applications that run several sessions at once (recording while watching
//! another one, say) hand the ticking to the factory. It keeps every streamer
//! it created alive until the application dropped its handle and the streamer
//! has no requests left, so a final stop still reaches the server.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;

use crate::config::{Config, StreamerConfig};
use crate::error::{Result, StreamerError};
use crate::streamer::SessionStreamer;
use crate::transport::{HttpTransport, ReqwestTransport};
use crate::wire::ReplayApi;

/// Handle to a streamer owned by a [`StreamerFactory`].
pub type SharedStreamer = Arc<Mutex<SessionStreamer>>;

pub struct StreamerFactory {
    config: StreamerConfig,
    api: ReplayApi,
    transport: Arc<dyn HttpTransport>,
    runtime: Handle,
    streamers: Vec<SharedStreamer>,
}

impl StreamerFactory {
    /// Create a factory bound to the current tokio runtime.
    pub fn new(
        config: StreamerConfig,
        api: ReplayApi,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| {
            StreamerError::invalid("streamer factory must be created inside a tokio runtime")
        })?;
        Ok(Self {
            config,
            api,
            transport,
            runtime,
            streamers: Vec::new(),
        })
    }

    /// Share one `reqwest` client between every streamer of the factory.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api = ReplayApi::new(&config.server.url)?;
        let transport = Arc::new(ReqwestTransport::new(&config.http)?);
        Self::new(config.streamer.clone(), api, transport)
    }

    pub fn create_streamer(&mut self) -> SharedStreamer {
        let streamer = SessionStreamer::with_runtime(
            self.config.clone(),
            self.api.clone(),
            Arc::clone(&self.transport),
            self.runtime.clone(),
        );
        let shared = Arc::new(Mutex::new(streamer));
        self.streamers.push(Arc::clone(&shared));
        tracing::debug!(count = self.streamers.len(), "streamer created");
        shared
    }

    /// Tick every streamer, then release the ones nobody else holds and that
    /// have nothing left to send.
    pub fn tick(&mut self, delta: Duration) {
        for streamer in &self.streamers {
            streamer.lock().tick(delta);
        }

        self.streamers.retain(|streamer| {
            if Arc::strong_count(streamer) > 1 {
                return true;
            }
            let guard = streamer.lock();
            if guard.has_pending_requests() {
                return true;
            }
            if guard.is_streaming() {
                tracing::warn!(session = ?guard.session(), "releasing a streamer that never stopped");
            }
            false
        });
    }

    /// Streamers still owned by the factory.
    #[must_use]
    pub fn len(&self) -> usize {
        self.streamers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streamers.is_empty()
    }
}
