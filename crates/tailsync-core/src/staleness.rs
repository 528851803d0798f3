//! Staleness detection
//!
//! A candidate is stale when the oldest entry it still retains is at or
//! after our applied position: the entries we would need next are gone, so
//! tailing it can never catch us up without a full resync.

use crate::Result;
use crate::gtid::{Gtid, compare};
use crate::oplog::{LocalOplog, OplogReader};
use std::cmp::Ordering;

/// Outcome of probing a connected candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// Candidate still covers our next entry
    Fresh {
        /// Oldest GTID the candidate retains
        remote_oldest: Gtid,
    },
    /// Candidate discarded history we still need
    Stale {
        /// Oldest GTID the candidate retains
        remote_oldest: Gtid,
    },
    /// Candidate's oplog holds nothing at all
    EmptyOplog,
}

impl Staleness {
    /// Whether the candidate is stale
    pub fn is_stale(&self) -> bool {
        matches!(self, Staleness::Stale { .. })
    }
}

/// Pure staleness rule: stale iff `local <= remote_oldest`.
pub fn is_stale_at(local: Gtid, remote_oldest: Gtid) -> bool {
    compare(&local, &remote_oldest) != Ordering::Greater
}

/// Probe a connected reader for its oldest entry and compare it with the
/// local applied GTID.
pub fn check_staleness(reader: &mut dyn OplogReader, local: &dyn LocalOplog) -> Result<Staleness> {
    let Some(oldest) = reader.oldest_entry()? else {
        return Ok(Staleness::EmptyOplog);
    };
    let remote_oldest = oldest.gtid;

    // Read after the network round trip so the comparison uses the freshest
    // local position.
    let applied = local.applied_gtid()?;
    if is_stale_at(applied, remote_oldest) {
        tracing::debug!(
            "Candidate oldest entry {} is not behind local applied {}",
            remote_oldest,
            applied
        );
        Ok(Staleness::Stale { remote_oldest })
    } else {
        Ok(Staleness::Fresh { remote_oldest })
    }
}

/// Boolean form of [`check_staleness`]; an empty remote oplog counts as
/// stale since it can never serve our next entry.
pub fn is_stale(reader: &mut dyn OplogReader, local: &dyn LocalOplog) -> Result<bool> {
    Ok(!matches!(check_staleness(reader, local)?, Staleness::Fresh { .. }))
}
