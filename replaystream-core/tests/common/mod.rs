// Shared fixtures for the integration tests
//
// `MemoryReplayServer` answers the replay service endpoints from memory so
// a recording can be played back without a network.

#![allow(dead_code)]

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use replaystream_core::config::StreamerConfig;
use replaystream_core::wire::{
    EventList, EventRecord, ReplayList, ReplaySummary, StartDownloadResponse, StartUploadResponse,
};
use replaystream_core::{HttpRequest, HttpResponse, HttpTransport, Method, SessionStreamer, TransportError};

#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub record: EventRecord,
    pub body: Bytes,
}

#[derive(Debug, Default, Clone)]
pub struct StoredSession {
    pub friendly_name: String,
    pub header: Bytes,
    pub chunks: Vec<(Bytes, u32, u32)>,
    pub time_ms: u32,
    pub live: bool,
    pub events: Vec<StoredEvent>,
    pub viewers: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    next_id: u32,
    sessions: HashMap<String, StoredSession>,
}

#[derive(Debug, Default)]
pub struct MemoryReplayServer {
    state: Mutex<State>,
}

fn json<T: serde::Serialize>(value: &T) -> HttpResponse {
    let body = serde_json::to_vec(value).unwrap_or_default();
    HttpResponse::new(200, Bytes::from(body)).with_header("Content-Type", "application/json")
}

fn status(code: u16) -> HttpResponse {
    HttpResponse::new(code, Bytes::new())
}

impl MemoryReplayServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self, name: &str) -> Option<StoredSession> {
        self.state.lock().sessions.get(name).cloned()
    }

    fn handle(&self, request: &HttpRequest) -> HttpResponse {
        let query: HashMap<String, String> = request.url.query_pairs().into_owned().collect();
        let param = |name: &str| query.get(name).cloned().unwrap_or_default();
        let number = |name: &str| param(name).parse::<u32>().unwrap_or(0);
        let segments: Vec<String> = request
            .url
            .path_segments()
            .map(|s| s.map(str::to_string).collect())
            .unwrap_or_default();
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();

        let mut state = self.state.lock();
        match (request.method, segments.as_slice()) {
            (Method::Post, ["replay"]) => {
                state.next_id += 1;
                let id = format!("session-{}", state.next_id);
                state.sessions.insert(
                    id.clone(),
                    StoredSession {
                        friendly_name: param("friendlyName"),
                        live: true,
                        ..StoredSession::default()
                    },
                );
                json(&StartUploadResponse { session_id: id })
            }
            (Method::Get, ["replay"]) => {
                let replays = state
                    .sessions
                    .iter()
                    .map(|(name, s)| ReplaySummary {
                        app_name: param("app"),
                        session_name: name.clone(),
                        friendly_name: s.friendly_name.clone(),
                        timestamp: String::new(),
                        size_in_bytes: s.chunks.iter().map(|(b, _, _)| b.len() as u64).sum(),
                        demo_time_ms: s.time_ms,
                        num_viewers: s.viewers.len() as u32,
                        is_live: s.live,
                        changelist: number("cl"),
                    })
                    .collect();
                json(&ReplayList { replays })
            }
            (method, ["replay", session, rest @ ..]) => {
                let Some(stored) = state.sessions.get_mut(*session) else {
                    return status(404);
                };
                match (method, rest) {
                    (Method::Post, ["file", "header"]) => {
                        stored.header = request.body.clone();
                        status(200)
                    }
                    (Method::Post, ["file", file]) => {
                        let Some(index) = file.strip_prefix("stream.").and_then(|i| i.parse::<usize>().ok())
                        else {
                            return status(400);
                        };
                        if index != stored.chunks.len() {
                            return status(409);
                        }
                        stored
                            .chunks
                            .push((request.body.clone(), number("rangeStart"), number("rangeEnd")));
                        stored.time_ms = number("time");
                        status(200)
                    }
                    (Method::Post, ["stopUploading"]) => {
                        stored.live = false;
                        stored.time_ms = number("time");
                        status(200)
                    }
                    (Method::Post, ["startDownloading"]) => {
                        let viewer = format!("viewer-{}", stored.viewers.len() + 1);
                        stored.viewers.push(viewer.clone());
                        json(&StartDownloadResponse {
                            state: if stored.live { "Live" } else { "Final" }.to_string(),
                            viewer_id: viewer,
                            num_chunks: stored.chunks.len() as u32,
                            time: stored.time_ms,
                        })
                    }
                    (Method::Get, ["file", "header"]) => HttpResponse::new(200, stored.header.clone()),
                    (Method::Get, ["file", file]) => {
                        let Some(index) = file.strip_prefix("stream.").and_then(|i| i.parse::<usize>().ok())
                        else {
                            return status(400);
                        };
                        let (body, start, end) = stored.chunks.get(index).cloned().unwrap_or_default();
                        HttpResponse::new(200, body)
                            .with_header("NumChunks", stored.chunks.len().to_string())
                            .with_header("Time", stored.time_ms.to_string())
                            .with_header("State", if stored.live { "Live" } else { "Final" })
                            .with_header("RangeStart", start.to_string())
                            .with_header("RangeEnd", end.to_string())
                    }
                    (Method::Post, ["viewer", _]) => status(200),
                    (Method::Post, ["event", rest @ ..]) => {
                        let id = match rest {
                            [id] => (*id).to_string(),
                            _ => format!("{session}_cp{}", stored.events.len()),
                        };
                        let record = EventRecord {
                            id: id.clone(),
                            group: param("group"),
                            time1: number("time1"),
                            time2: number("time2"),
                            meta: param("meta"),
                        };
                        stored.events.retain(|e| e.record.id != id);
                        stored.events.push(StoredEvent {
                            record,
                            body: request.body.clone(),
                        });
                        status(200)
                    }
                    (Method::Get, ["event"]) => {
                        let group = param("group");
                        let events = stored
                            .events
                            .iter()
                            .filter(|e| group.is_empty() || e.record.group == group)
                            .map(|e| e.record.clone())
                            .collect();
                        json(&EventList { events })
                    }
                    (Method::Get, ["event", id]) => stored
                        .events
                        .iter()
                        .find(|e| e.record.id == *id)
                        .map_or_else(|| status(404), |e| HttpResponse::new(200, e.body.clone())),
                    _ => status(404),
                }
            }
            _ => status(404),
        }
    }
}

#[async_trait]
impl HttpTransport for MemoryReplayServer {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        Ok(self.handle(&request))
    }
}

pub fn test_config() -> StreamerConfig {
    StreamerConfig {
        flush_interval_ms: 50,
        chunk_poll_interval_ms: 20,
        ..StreamerConfig::default()
    }
}

/// Tick by 1ms until `done` holds, yielding to the transport tasks in between.
pub async fn drive(streamer: &mut SessionStreamer, done: impl Fn(&SessionStreamer) -> bool) {
    for _ in 0..2_000 {
        if done(streamer) {
            return;
        }
        streamer.tick(Duration::from_millis(1));
        tokio::task::yield_now().await;
    }
    panic!("streamer never reached the expected state: {streamer:?}");
}
