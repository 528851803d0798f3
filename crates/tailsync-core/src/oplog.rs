//! Oplog records and the two storage-facing collaborators: the local durable
//! oplog and the tailing reader over a remote member's oplog.

use crate::Result;
use crate::gtid::Gtid;
use crate::member::Member;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A single operation fetched from a remote oplog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OplogEntry {
    /// Identity and ordering key
    pub gtid: Gtid,
    /// Encoded operation, opaque to the engine
    pub payload: Bytes,
}

impl OplogEntry {
    /// Create an entry
    pub fn new(gtid: Gtid, payload: impl Into<Bytes>) -> Self {
        Self {
            gtid,
            payload: payload.into(),
        }
    }
}

/// Local durable oplog
pub trait LocalOplog: Send + Sync {
    /// GTID of the newest operation reflected in local state
    fn applied_gtid(&self) -> Result<Gtid>;

    /// Queue a fetched operation for the apply side
    fn append(&self, entry: OplogEntry) -> Result<()>;
}

/// Cursor session over a remote member's oplog.
///
/// A reader is single-use per session: `connect`, optionally probe with
/// `oldest_entry`, then `query_from` and drain with
/// `more_in_current_batch` / `more` / `next`. `reset` drops the
/// connection and any cursor.
pub trait OplogReader: Send {
    /// Open a connection to `member`
    fn connect(&mut self, member: &Member) -> Result<()>;

    /// Oldest entry the member still retains, `None` for an empty oplog
    fn oldest_entry(&mut self) -> Result<Option<OplogEntry>>;

    /// Open a tailable cursor over entries with GTID >= `start`
    fn query_from(&mut self, start: Gtid) -> Result<()>;

    /// Whether a live cursor exists
    fn has_cursor(&self) -> bool;

    /// Whether the current batch still holds records (never blocks)
    fn more_in_current_batch(&self) -> bool;

    /// Whether another record is available, fetching a new batch from the
    /// network when the current one is drained (blocks)
    fn more(&mut self) -> Result<bool>;

    /// Next record; only valid after `more` returned true
    fn next(&mut self) -> Result<OplogEntry>;

    /// Re-validate a tailable cursor after the batch ran dry; drops the
    /// cursor if it died on the remote side
    fn tail_check(&mut self) -> Result<()>;

    /// Drop the connection and cursor
    fn reset(&mut self);
}

/// Produces fresh, unconnected readers
pub trait ReaderFactory: Send + Sync {
    /// Create a reader for one selection + tailing session
    fn reader(&self) -> Box<dyn OplogReader>;
}
