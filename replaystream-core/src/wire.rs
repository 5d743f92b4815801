//! Replay service wire format
//!
//! URL builders for every endpoint and the JSON bodies exchanged with the
//! server. Field names are a compatibility surface; keep them stable.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::TransportError;
use crate::transport::HttpResponse;

/// Response header carrying the total number of chunks known to the server.
pub const HEADER_NUM_CHUNKS: &str = "NumChunks";
/// Response header carrying the total recorded time in milliseconds.
pub const HEADER_TIME: &str = "Time";
/// Response header carrying the session state (`Live` while recording).
pub const HEADER_STATE: &str = "State";
pub const HEADER_RANGE_START: &str = "RangeStart";
pub const HEADER_RANGE_END: &str = "RangeEnd";

/// Session state value reported while a writer is still recording.
pub const STATE_LIVE: &str = "Live";

/// Application/version triple a recording is tagged with.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReplayVersion {
    pub app: String,
    pub network_version: u32,
    pub changelist: u32,
}

impl ReplayVersion {
    pub fn new(app: impl Into<String>, network_version: u32, changelist: u32) -> Self {
        Self {
            app: app.into(),
            network_version,
            changelist,
        }
    }
}

/// Filter for session enumeration.
#[derive(Debug, Clone, Default)]
pub struct SessionQuery {
    pub user: Option<String>,
    pub meta: Option<String>,
    /// Only sessions recently watched by this viewer.
    pub recent_viewer: Option<String>,
}

// --- JSON bodies

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartUploadResponse {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartDownloadResponse {
    pub state: String,
    pub viewer_id: String,
    #[serde(default)]
    pub num_chunks: u32,
    #[serde(default)]
    pub time: u32,
}

impl StartDownloadResponse {
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.state == STATE_LIVE
    }
}

/// One entry of a session enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaySummary {
    #[serde(default)]
    pub app_name: String,
    pub session_name: String,
    #[serde(default)]
    pub friendly_name: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub size_in_bytes: u64,
    #[serde(default)]
    pub demo_time_ms: u32,
    #[serde(default)]
    pub num_viewers: u32,
    #[serde(default)]
    pub is_live: bool,
    #[serde(default)]
    pub changelist: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayList {
    #[serde(default)]
    pub replays: Vec<ReplaySummary>,
}

/// Server-side event (checkpoints are events in the `checkpoint` group).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub time1: u32,
    #[serde(default)]
    pub time2: u32,
    #[serde(default)]
    pub meta: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventList {
    #[serde(default)]
    pub events: Vec<EventRecord>,
}

/// Body of a start-upload call when users are attached to the recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserList {
    pub users: Vec<String>,
}

/// Stream bookkeeping returned with every chunk download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkHeaders {
    pub num_chunks: u32,
    pub time_ms: u32,
    pub live: bool,
    pub range_start_ms: u32,
    pub range_end_ms: u32,
}

impl ChunkHeaders {
    /// Missing or malformed numeric headers read as zero.
    #[must_use]
    pub fn from_response(response: &HttpResponse) -> Self {
        let number = |name: &str| {
            response
                .header(name)
                .and_then(|v| v.trim().parse::<u32>().ok())
                .unwrap_or(0)
        };
        Self {
            num_chunks: number(HEADER_NUM_CHUNKS),
            time_ms: number(HEADER_TIME),
            live: response.header(HEADER_STATE) == Some(STATE_LIVE),
            range_start_ms: number(HEADER_RANGE_START),
            range_end_ms: number(HEADER_RANGE_END),
        }
    }
}

// --- URL builders

/// Builds endpoint URLs below `<base>/replay`.
#[derive(Debug, Clone)]
pub struct ReplayApi {
    base: Url,
}

impl ReplayApi {
    /// The base URL must be hierarchical (`http://host[:port][/prefix]`).
    pub fn new(base: &str) -> Result<Self, TransportError> {
        let base = Url::parse(base)?;
        if base.cannot_be_a_base() {
            return Err(TransportError::InvalidUrl(format!(
                "{base} cannot carry a path"
            )));
        }
        Ok(Self { base })
    }

    #[must_use]
    pub const fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // Checked in `new`: the base is hierarchical.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("replay").extend(segments);
        }
        url
    }

    /// `POST /replay?app=&version=&cl=&friendlyName=[&meta=]`
    #[must_use]
    pub fn start_upload(&self, version: &ReplayVersion, friendly_name: &str, meta: Option<&str>) -> Url {
        let mut url = self.endpoint(&[]);
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("app", &version.app)
                .append_pair("version", &version.network_version.to_string())
                .append_pair("cl", &version.changelist.to_string())
                .append_pair("friendlyName", friendly_name);
            if let Some(meta) = meta.filter(|m| !m.is_empty()) {
                query.append_pair("meta", meta);
            }
        }
        url
    }

    /// `POST /replay/{session}/file/header?numChunks=&time=`
    #[must_use]
    pub fn upload_header(&self, session: &str, num_chunks: u32, time_ms: u32) -> Url {
        let mut url = self.endpoint(&[session, "file", "header"]);
        url.query_pairs_mut()
            .append_pair("numChunks", &num_chunks.to_string())
            .append_pair("time", &time_ms.to_string());
        url
    }

    /// `POST /replay/{session}/file/stream.{idx}?numChunks=&time=&rangeStart=&rangeEnd=`
    #[must_use]
    pub fn upload_chunk(
        &self,
        session: &str,
        index: u32,
        num_chunks: u32,
        time_ms: u32,
        range_start_ms: u32,
        range_end_ms: u32,
    ) -> Url {
        let file = format!("stream.{index}");
        let mut url = self.endpoint(&[session, "file", &file]);
        url.query_pairs_mut()
            .append_pair("numChunks", &num_chunks.to_string())
            .append_pair("time", &time_ms.to_string())
            .append_pair("rangeStart", &range_start_ms.to_string())
            .append_pair("rangeEnd", &range_end_ms.to_string());
        url
    }

    /// `POST /replay/{session}/stopUploading?numChunks=&time=`
    #[must_use]
    pub fn stop_upload(&self, session: &str, num_chunks: u32, time_ms: u32) -> Url {
        let mut url = self.endpoint(&[session, "stopUploading"]);
        url.query_pairs_mut()
            .append_pair("numChunks", &num_chunks.to_string())
            .append_pair("time", &time_ms.to_string());
        url
    }

    /// `POST /replay/{session}/startDownloading?user=`
    #[must_use]
    pub fn start_download(&self, session: &str, user: &str) -> Url {
        let mut url = self.endpoint(&[session, "startDownloading"]);
        url.query_pairs_mut().append_pair("user", user);
        url
    }

    /// `GET /replay/{session}/file/header`
    #[must_use]
    pub fn download_header(&self, session: &str) -> Url {
        self.endpoint(&[session, "file", "header"])
    }

    /// `GET /replay/{session}/file/stream.{idx}`
    #[must_use]
    pub fn download_chunk(&self, session: &str, index: u32) -> Url {
        let file = format!("stream.{index}");
        self.endpoint(&[session, "file", &file])
    }

    /// `POST /replay/{session}/viewer/{viewer}[?final=true]`
    #[must_use]
    pub fn refresh_viewer(&self, session: &str, viewer: &str, is_final: bool) -> Url {
        let mut url = self.endpoint(&[session, "viewer", viewer]);
        if is_final {
            url.query_pairs_mut().append_pair("final", "true");
        }
        url
    }

    /// `GET /replay?app=&cl=&version=[&meta=][&user=][&recent=]`
    #[must_use]
    pub fn enumerate_sessions(&self, version: &ReplayVersion, query: &SessionQuery) -> Url {
        let mut url = self.endpoint(&[]);
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("app", &version.app)
                .append_pair("cl", &version.changelist.to_string())
                .append_pair("version", &version.network_version.to_string());
            if let Some(meta) = query.meta.as_deref().filter(|m| !m.is_empty()) {
                pairs.append_pair("meta", meta);
            }
            if let Some(user) = query.user.as_deref().filter(|u| !u.is_empty()) {
                pairs.append_pair("user", user);
            }
            if let Some(recent) = query.recent_viewer.as_deref().filter(|r| !r.is_empty()) {
                pairs.append_pair("recent", recent);
            }
        }
        url
    }

    /// `POST /replay/{session}/event[/{eventId}]?group=&time1=&time2=&meta=`
    #[must_use]
    pub fn upload_event(
        &self,
        session: &str,
        event_id: Option<&str>,
        group: &str,
        time1_ms: u32,
        time2_ms: u32,
        meta: &str,
    ) -> Url {
        let mut url = match event_id {
            Some(id) => self.endpoint(&[session, "event", id]),
            None => self.endpoint(&[session, "event"]),
        };
        url.query_pairs_mut()
            .append_pair("group", group)
            .append_pair("time1", &time1_ms.to_string())
            .append_pair("time2", &time2_ms.to_string())
            .append_pair("meta", meta);
        url
    }

    /// `GET /replay/{session}/event?group=`
    #[must_use]
    pub fn enumerate_events(&self, session: &str, group: &str) -> Url {
        let mut url = self.endpoint(&[session, "event"]);
        url.query_pairs_mut().append_pair("group", group);
        url
    }

    /// `GET /replay/{session}/event/{eventId}`
    #[must_use]
    pub fn download_event(&self, session: &str, event_id: &str) -> Url {
        self.endpoint(&[session, "event", event_id])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn api() -> ReplayApi {
        ReplayApi::new("http://replay.example.com:8080").unwrap()
    }

    #[test]
    fn test_start_upload_url() {
        let version = ReplayVersion::new("arena", 7, 1234);
        let url = api().start_upload(&version, "Finals Map", None);
        assert_eq!(
            url.as_str(),
            "http://replay.example.com:8080/replay?app=arena&version=7&cl=1234&friendlyName=Finals+Map"
        );

        let url = api().start_upload(&version, "x", Some("ranked"));
        assert!(url.as_str().ends_with("&meta=ranked"));
    }

    #[test]
    fn test_chunk_urls() {
        let url = api().upload_chunk("s1", 3, 4, 12_000, 9_000, 12_000);
        assert_eq!(url.path(), "/replay/s1/file/stream.3");
        assert_eq!(
            url.query(),
            Some("numChunks=4&time=12000&rangeStart=9000&rangeEnd=12000")
        );
        assert_eq!(api().download_chunk("s1", 3).path(), "/replay/s1/file/stream.3");
    }

    #[test]
    fn test_base_prefix_is_kept() {
        let api = ReplayApi::new("https://cdn.example.com/api/v1/").unwrap();
        assert_eq!(api.download_header("abc").path(), "/api/v1/replay/abc/file/header");
    }

    #[test]
    fn test_session_is_path_escaped() {
        let url = api().download_header("a/b c");
        assert_eq!(url.path(), "/replay/a%2Fb%20c/file/header");
    }

    #[test]
    fn test_refresh_viewer_final_flag() {
        assert_eq!(api().refresh_viewer("s", "v", false).query(), None);
        assert_eq!(api().refresh_viewer("s", "v", true).query(), Some("final=true"));
    }

    #[test]
    fn test_enumerate_sessions_optional_params() {
        let version = ReplayVersion::new("arena", 1, 2);
        let url = api().enumerate_sessions(&version, &SessionQuery::default());
        assert_eq!(url.query(), Some("app=arena&cl=2&version=1"));

        let query = SessionQuery {
            user: Some("bob".to_string()),
            meta: Some("ranked".to_string()),
            recent_viewer: None,
        };
        let url = api().enumerate_sessions(&version, &query);
        assert_eq!(url.query(), Some("app=arena&cl=2&version=1&meta=ranked&user=bob"));
    }

    #[test]
    fn test_event_urls() {
        let url = api().upload_event("s", None, CHECKPOINT, 500, 500, "2");
        assert_eq!(url.path(), "/replay/s/event");
        assert_eq!(url.query(), Some("group=checkpoint&time1=500&time2=500&meta=2"));

        let url = api().upload_event("s", Some("s_kill"), "kills", 1, 2, "");
        assert_eq!(url.path(), "/replay/s/event/s_kill");
        assert_eq!(api().download_event("s", "e9").path(), "/replay/s/event/e9");
    }

    const CHECKPOINT: &str = crate::checkpoint::CHECKPOINT_GROUP;

    #[test]
    fn test_rejects_non_hierarchical_base() {
        assert!(ReplayApi::new("mailto:replay@example.com").is_err());
        assert!(ReplayApi::new("not a url").is_err());
    }

    #[test]
    fn test_chunk_headers_parse() {
        let response = HttpResponse::new(200, Bytes::from_static(b"data"))
            .with_header("numchunks", "12")
            .with_header("Time", "60000")
            .with_header("State", "Live")
            .with_header("RangeStart", "55000")
            .with_header("RangeEnd", "60000");
        let headers = ChunkHeaders::from_response(&response);
        assert_eq!(
            headers,
            ChunkHeaders {
                num_chunks: 12,
                time_ms: 60_000,
                live: true,
                range_start_ms: 55_000,
                range_end_ms: 60_000,
            }
        );
    }

    #[test]
    fn test_chunk_headers_missing_read_as_zero() {
        let response = HttpResponse::new(200, Bytes::new()).with_header("State", "Final");
        let headers = ChunkHeaders::from_response(&response);
        assert_eq!(headers, ChunkHeaders::default());
    }

    #[test]
    fn test_json_bodies() {
        let start: StartDownloadResponse = serde_json::from_str(
            r#"{"state":"Live","viewerId":"v-1","numChunks":3,"time":9000}"#,
        )
        .unwrap();
        assert!(start.is_live());
        assert_eq!(start.num_chunks, 3);

        let list: ReplayList = serde_json::from_str(
            r#"{"replays":[{"sessionName":"s1","friendlyName":"Finals","isLive":true,"demoTimeMs":500}]}"#,
        )
        .unwrap();
        assert_eq!(list.replays.len(), 1);
        assert!(list.replays[0].is_live);
        assert_eq!(list.replays[0].demo_time_ms, 500);

        let events: EventList = serde_json::from_str(
            r#"{"events":[{"id":"e1","group":"checkpoint","time1":10,"time2":10,"meta":"1"}]}"#,
        )
        .unwrap();
        assert_eq!(events.events[0].meta, "1");
    }
}
