// ReplayStream core
//
// Records replay sessions to an HTTP replay service in ordered chunks and
// plays them back, live or finished, with checkpoint-based seeking.
//
// Layout:
// - archive / checkpoint: pure data (byte archives, checkpoint index)
// - request / queue: single-flight operation queue
// - policy: flush and live-tail cadences
// - streamer: the session state machine driven by `tick`
// - factory: owns and ticks many streamers
// - transport / wire: HTTP seam and the service's URL and JSON shapes

pub mod archive;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod factory;
pub mod logging;
pub mod policy;
pub mod queue;
pub mod request;
pub mod streamer;
pub mod transport;
pub mod wire;

#[cfg(test)]
pub mod test_helpers;

pub use archive::{ArchiveMode, ByteArchive};
pub use checkpoint::{CheckpointIndex, CheckpointRecord, CheckpointTarget};
pub use config::Config;
pub use error::{Result, StreamerError, TransportError};
pub use factory::{SharedStreamer, StreamerFactory};
pub use streamer::{CheckpointReady, SessionStreamer, StreamList, StreamReady, StreamerState};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport};
pub use wire::{ReplayApi, ReplaySummary, ReplayVersion};
