//! Queued streamer operations
//!
//! Every network interaction of a session streamer is an [`Operation`]. Data
//! that is only known once the operation reaches the head of the queue (the
//! session id, the viewer id, the header bytes, event ids) is bound when the
//! request is built, not when the operation is enqueued.

use std::fmt;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::checkpoint::CheckpointRecord;
use crate::error::StreamerError;
use crate::wire::{ReplaySummary, ReplayVersion, SessionQuery};

/// Type tag of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    StartUpload,
    UploadHeader,
    UploadChunk,
    StopUpload,
    StartDownload,
    DownloadHeader,
    DownloadChunk,
    RefreshViewer,
    EnumerateSessions,
    EnumerateCheckpoints,
    UploadCheckpoint,
    DownloadCheckpoint,
    AddEvent,
    StopStreaming,
}

impl RequestKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StartUpload => "start_upload",
            Self::UploadHeader => "upload_header",
            Self::UploadChunk => "upload_chunk",
            Self::StopUpload => "stop_upload",
            Self::StartDownload => "start_download",
            Self::DownloadHeader => "download_header",
            Self::DownloadChunk => "download_chunk",
            Self::RefreshViewer => "refresh_viewer",
            Self::EnumerateSessions => "enumerate_sessions",
            Self::EnumerateCheckpoints => "enumerate_checkpoints",
            Self::UploadCheckpoint => "upload_checkpoint",
            Self::DownloadCheckpoint => "download_checkpoint",
            Self::AddEvent => "add_event",
            Self::StopStreaming => "stop_streaming",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reply channel of a session enumeration.
pub type EnumerateReply = oneshot::Sender<Result<Vec<ReplaySummary>, StreamerError>>;

/// An operation waiting in (or running from) the request queue.
#[derive(Debug)]
pub enum Operation {
    StartUpload {
        version: ReplayVersion,
        friendly_name: String,
        meta: Option<String>,
        users: Vec<String>,
    },
    /// Pseudo-operation: waits for the session id and the serialized header,
    /// then turns into the header upload.
    UploadHeader,
    UploadChunk {
        index: u32,
        num_chunks: u32,
        time_ms: u32,
        range_start_ms: u32,
        range_end_ms: u32,
        body: Bytes,
    },
    StopUpload {
        num_chunks: u32,
        time_ms: u32,
    },
    StartDownload {
        user: String,
    },
    DownloadHeader,
    DownloadChunk {
        index: u32,
    },
    RefreshViewer {
        is_final: bool,
    },
    EnumerateSessions {
        version: ReplayVersion,
        query: SessionQuery,
        reply: EnumerateReply,
    },
    EnumerateCheckpoints,
    UploadCheckpoint {
        time_ms: u32,
        chunk_index: u32,
        body: Bytes,
    },
    DownloadCheckpoint {
        index: usize,
        record: CheckpointRecord,
    },
    AddEvent {
        name: String,
        group: String,
        time1_ms: u32,
        time2_ms: u32,
        meta: String,
        body: Bytes,
    },
    /// Pseudo-operation: terminal transition back to idle.
    StopStreaming,
}

impl Operation {
    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        match self {
            Self::StartUpload { .. } => RequestKind::StartUpload,
            Self::UploadHeader => RequestKind::UploadHeader,
            Self::UploadChunk { .. } => RequestKind::UploadChunk,
            Self::StopUpload { .. } => RequestKind::StopUpload,
            Self::StartDownload { .. } => RequestKind::StartDownload,
            Self::DownloadHeader => RequestKind::DownloadHeader,
            Self::DownloadChunk { .. } => RequestKind::DownloadChunk,
            Self::RefreshViewer { .. } => RequestKind::RefreshViewer,
            Self::EnumerateSessions { .. } => RequestKind::EnumerateSessions,
            Self::EnumerateCheckpoints => RequestKind::EnumerateCheckpoints,
            Self::UploadCheckpoint { .. } => RequestKind::UploadCheckpoint,
            Self::DownloadCheckpoint { .. } => RequestKind::DownloadCheckpoint,
            Self::AddEvent { .. } => RequestKind::AddEvent,
            Self::StopStreaming => RequestKind::StopStreaming,
        }
    }

    /// Resolve any deferred result carried by an operation that will never run.
    pub(crate) fn abandon(self, reason: &StreamerError) {
        if let Self::EnumerateSessions { reply, .. } = self {
            let _ = reply.send(Err(reason.clone()));
        }
    }
}

/// What the pre-processing step decided for the operation at the head of the queue.
#[derive(Debug)]
pub enum PreProcess {
    /// Build the transport request and put it in flight.
    Execute,
    /// Not runnable yet; keep it at the head of the queue.
    Defer,
    /// Handled locally; nothing goes in flight.
    Complete,
}
