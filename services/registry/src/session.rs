//! Upload session table

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

/// No upload session exists with this id.
#[derive(Debug, thiserror::Error)]
#[error("unknown upload session {0}")]
pub struct UnknownUploadSession(pub Uuid);

/// Byte range covered by an upload after a chunk was appended.
///
/// `start` is the offset before the chunk, `end` the new cumulative offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadRange {
    /// Offset before the chunk.
    pub start: u64,
    /// Cumulative offset after the chunk.
    pub end: u64,
}

impl fmt::Display for UploadRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// In-memory table of active upload sessions and their cumulative offsets.
///
/// Sessions do not survive a restart.
#[derive(Debug, Clone, Default)]
pub struct UploadSessions {
    sessions: Arc<DashMap<Uuid, u64>>,
}

impl UploadSessions {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new session at offset 0.
    pub fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.sessions.insert(id, 0);
        tracing::trace!(%id, "created upload session");
        id
    }

    /// Advance a session by `delta` bytes.
    pub fn append(&self, id: &Uuid, delta: u64) -> Result<UploadRange, UnknownUploadSession> {
        let mut offset = self.sessions.get_mut(id).ok_or(UnknownUploadSession(*id))?;
        let start = *offset;
        *offset += delta;
        Ok(UploadRange {
            start,
            end: *offset,
        })
    }

    /// Current cumulative offset of a session.
    pub fn offset(&self, id: &Uuid) -> Option<u64> {
        self.sessions.get(id).map(|offset| *offset)
    }

    /// Drop a session, returning its final offset.
    pub fn remove(&self, id: &Uuid) -> Option<u64> {
        self.sessions.remove(id).map(|(_, offset)| offset)
    }

    /// Number of active sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether there are no active sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
