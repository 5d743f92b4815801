//! Test utilities shared by the unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::config::StreamerConfig;
use crate::error::TransportError;
use crate::streamer::SessionStreamer;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

type Scripted = Result<HttpResponse, TransportError>;

/// Transport answering from a script and recording every request.
///
/// Responses registered for a path with [`ScriptedTransport::route`] win;
/// everything else is answered from the shared queue, in order.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Scripted>>,
    routes: Mutex<HashMap<String, VecDeque<Scripted>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: Scripted) {
        self.responses.lock().push_back(response);
    }

    /// Answer the next request for `path` with `response`.
    pub fn route(&self, path: &str, response: Scripted) {
        self.routes
            .lock()
            .entry(path.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn push_json(&self, status: u16, body: &str) {
        self.push(Ok(HttpResponse::new(status, Bytes::copy_from_slice(body.as_bytes()))
            .with_header("Content-Type", "application/json")));
    }

    pub fn push_status(&self, status: u16) {
        self.push(Ok(HttpResponse::new(status, Bytes::new())));
    }

    pub fn push_network_error(&self) {
        self.push(Err(TransportError::Network("connection reset".to_string())));
    }

    /// Chunk response with the stream bookkeeping headers.
    pub fn chunk(body: &[u8], num_chunks: u32, live: bool, range: (u32, u32)) -> Scripted {
        let state = if live { "Live" } else { "Final" };
        Ok(HttpResponse::new(200, Bytes::copy_from_slice(body))
            .with_header("NumChunks", num_chunks.to_string())
            .with_header("Time", range.1.to_string())
            .with_header("State", state)
            .with_header("RangeStart", range.0.to_string())
            .with_header("RangeEnd", range.1.to_string()))
    }

    pub fn json(body: &str) -> Scripted {
        Ok(HttpResponse::new(200, Bytes::copy_from_slice(body.as_bytes())))
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// `METHOD /path?query` of every request so far.
    pub fn request_lines(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|r| match r.url.query() {
                Some(q) => format!("{} {}?{q}", r.method, r.url.path()),
                None => format!("{} {}", r.method, r.url.path()),
            })
            .collect()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let path = request.url.path().to_string();
        self.requests.lock().push(request);
        if let Some(response) = self.routes.lock().get_mut(&path).and_then(VecDeque::pop_front) {
            return response;
        }
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Network(format!("no scripted response for {path}"))))
    }
}

/// Transport whose calls never complete.
///
/// Tracks how many calls started and whether every started call was
/// dropped again, which only happens when its task is aborted.
#[derive(Debug, Default)]
pub struct StalledTransport {
    started: AtomicUsize,
    dropped: Arc<AtomicBool>,
}

impl StalledTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl HttpTransport for StalledTransport {
    async fn execute(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let _flag = DropFlag(Arc::clone(&self.dropped));
        std::future::pending().await
    }
}

/// Cadences short enough to cross in a handful of ticks.
pub fn fast_config() -> StreamerConfig {
    StreamerConfig {
        flush_interval_ms: 50,
        chunk_poll_interval_ms: 20,
        viewer_refresh_interval_ms: 1_000,
        checkpoint_refresh_interval_ms: 1_000,
        ..StreamerConfig::default()
    }
}

/// Tick `times` times by 1ms, letting spawned transport tasks run in between.
pub async fn pump(streamer: &mut SessionStreamer, times: usize) {
    for _ in 0..times {
        streamer.tick(Duration::from_millis(1));
        tokio::task::yield_now().await;
    }
}

/// Pump until `done` holds.
pub async fn pump_until(streamer: &mut SessionStreamer, done: impl Fn(&SessionStreamer) -> bool) {
    for _ in 0..500 {
        if done(streamer) {
            return;
        }
        streamer.tick(Duration::from_millis(1));
        tokio::task::yield_now().await;
    }
    panic!("condition not reached: {streamer:?}");
}

/// Pump until nothing is queued or in flight.
pub async fn pump_idle(streamer: &mut SessionStreamer) {
    for _ in 0..200 {
        if !streamer.has_pending_requests() {
            return;
        }
        streamer.tick(Duration::from_millis(1));
        tokio::task::yield_now().await;
    }
    panic!("streamer still has pending requests: {streamer:?}");
}
