//! Checkpoint index used for seeking
//!
//! Checkpoints are fetched from the server as a flat event list, sorted by
//! the start of their time range and replaced wholesale on re-enumeration.

use crate::wire::EventRecord;

/// Group tag the streamer uses for checkpoint events.
pub const CHECKPOINT_GROUP: &str = "checkpoint";

/// Where a navigation should resume from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointTarget {
    /// The synthetic start-of-session checkpoint (index `-1`).
    Start,
    /// A concrete entry of the checkpoint index.
    Index(usize),
}

impl CheckpointTarget {
    /// Legacy integer form: `-1` for the start of the session.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        match self {
            Self::Start => -1,
            Self::Index(i) => i as i64,
        }
    }
}

impl From<i32> for CheckpointTarget {
    /// Negative indices select the start of the session.
    fn from(index: i32) -> Self {
        usize::try_from(index).map_or(Self::Start, Self::Index)
    }
}

/// A checkpoint as cached on the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRecord {
    pub id: String,
    pub group: String,
    pub time_start_ms: u32,
    pub time_end_ms: u32,
    /// Raw metadata string as stored by the server.
    pub metadata: String,
    /// Chunk to resume streaming from, decoded from `metadata`.
    /// `None` when the metadata is not a chunk index.
    pub resume_chunk: Option<u32>,
}

impl From<EventRecord> for CheckpointRecord {
    fn from(event: EventRecord) -> Self {
        let resume_chunk = event.meta.trim().parse::<u32>().ok();
        Self {
            id: event.id,
            group: event.group,
            time_start_ms: event.time1,
            time_end_ms: event.time2,
            metadata: event.meta,
            resume_chunk,
        }
    }
}

/// Ordered list of checkpoints (ascending by start time, ties in arrival order).
#[derive(Debug, Clone, Default)]
pub struct CheckpointIndex {
    records: Vec<CheckpointRecord>,
}

impl CheckpointIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole index with a freshly enumerated list.
    pub fn replace(&mut self, mut records: Vec<CheckpointRecord>) {
        // sort_by_key is stable
        records.sort_by_key(|r| r.time_start_ms);
        self.records = records;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&CheckpointRecord> {
        self.records.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CheckpointRecord> {
        self.records.iter()
    }

    /// Latest checkpoint whose start is at or before `time_ms`.
    ///
    /// A target at or beyond the last checkpoint resolves to the last one;
    /// a target before the first resolves to [`CheckpointTarget::Start`].
    #[must_use]
    pub fn resolve_time(&self, time_ms: u32) -> CheckpointTarget {
        let at_or_before = self.records.partition_point(|r| r.time_start_ms <= time_ms);
        match at_or_before {
            0 => CheckpointTarget::Start,
            n => CheckpointTarget::Index(n - 1),
        }
    }
}
