//! Rollback precondition check
//!
//! The tailing query is inclusive: it starts at the GTID we already hold.
//! If the source's history matches ours, the first record it returns is
//! exactly that GTID. Anything else means the source never saw our last
//! entry, i.e. our history forked from it and must be rolled back before
//! tailing can resume.

use crate::Result;
use crate::gtid::Gtid;
use crate::oplog::{OplogEntry, OplogReader};

/// Result of inspecting the head of a fresh tailing cursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackCheck {
    /// Histories agree. `first` is the head record when it must still be
    /// queued (empty local oplog); the duplicate boundary record is dropped.
    InSync {
        /// Head record to hand off, if any
        first: Option<OplogEntry>,
    },
    /// Cursor returned nothing: the source is behind us or was truncated
    SourceBehind,
    /// The source does not hold our newest entry
    Diverged {
        /// Newest GTID we hold
        local: Gtid,
        /// First GTID the source returned instead
        remote: Gtid,
    },
}

impl RollbackCheck {
    /// Whether local history has to be reconciled with the source
    pub fn requires_rollback(&self) -> bool {
        matches!(self, RollbackCheck::Diverged { .. })
    }
}

/// Inspect the head of a cursor opened with `query_from(start)`.
///
/// A zero `start` keeps the head record. The producer never gets there: an
/// empty local oplog is stale against every source that holds an entry, so
/// selection never hands it a target. Callers replaying from scratch do.
pub fn check_rollback(reader: &mut dyn OplogReader, start: Gtid) -> Result<RollbackCheck> {
    if !reader.more()? {
        return Ok(RollbackCheck::SourceBehind);
    }
    let first = reader.next()?;

    if start.is_zero() {
        return Ok(RollbackCheck::InSync { first: Some(first) });
    }
    if first.gtid == start {
        return Ok(RollbackCheck::InSync { first: None });
    }
    Ok(RollbackCheck::Diverged {
        local: start,
        remote: first.gtid,
    })
}

/// Boolean form of [`check_rollback`]
pub fn requires_rollback(reader: &mut dyn OplogReader, start: Gtid) -> Result<bool> {
    Ok(check_rollback(reader, start)?.requires_rollback())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::Member;
    use crate::testing::{ScriptedPeer, ScriptedReader};

    fn cursor_from(peer: ScriptedPeer, start: Gtid) -> ScriptedReader {
        let mut reader = ScriptedReader::new(vec![peer.clone()]);
        reader.connect(&Member::new(peer.addr())).unwrap();
        reader.query_from(start).unwrap();
        reader
    }

    #[test]
    fn test_matching_head_is_dropped() {
        let peer = ScriptedPeer::new("a:1").with_range(Gtid::new(1, 1), Gtid::new(1, 20));
        let mut reader = cursor_from(peer, Gtid::new(1, 7));

        let check = check_rollback(&mut reader, Gtid::new(1, 7)).unwrap();
        assert_eq!(check, RollbackCheck::InSync { first: None });
        assert!(!check.requires_rollback());
        // The cursor continues right after the boundary record.
        assert!(reader.more().unwrap());
        assert_eq!(reader.next().unwrap().gtid, Gtid::new(1, 8));
    }

    #[test]
    fn test_missing_head_is_divergence() {
        // Our last entry 1:7 was written by a primary that lost it; the new
        // source skipped straight to term 2.
        let peer = ScriptedPeer::new("a:1").with_entries(vec![
            OplogEntry::new(Gtid::new(1, 5), "x"),
            OplogEntry::new(Gtid::new(1, 6), "y"),
            OplogEntry::new(Gtid::new(2, 1), "z"),
        ]);
        let mut reader = cursor_from(peer, Gtid::new(1, 7));

        let check = check_rollback(&mut reader, Gtid::new(1, 7)).unwrap();
        assert_eq!(
            check,
            RollbackCheck::Diverged {
                local: Gtid::new(1, 7),
                remote: Gtid::new(2, 1),
            }
        );
        assert!(check.requires_rollback());
    }

    #[test]
    fn test_empty_cursor_means_source_behind() {
        let peer = ScriptedPeer::new("a:1").with_range(Gtid::new(1, 1), Gtid::new(1, 5));
        let mut reader = cursor_from(peer, Gtid::new(1, 9));

        assert_eq!(
            check_rollback(&mut reader, Gtid::new(1, 9)).unwrap(),
            RollbackCheck::SourceBehind
        );
    }

    #[test]
    fn test_empty_local_keeps_head() {
        let peer = ScriptedPeer::new("a:1").with_range(Gtid::new(1, 1), Gtid::new(1, 3));
        let mut reader = cursor_from(peer, Gtid::ZERO);

        match check_rollback(&mut reader, Gtid::ZERO).unwrap() {
            RollbackCheck::InSync { first: Some(entry) } => {
                assert_eq!(entry.gtid, Gtid::new(1, 1))
            }
            other => panic!("unexpected check result: {:?}", other),
        }
        assert!(!requires_rollback(&mut reader, Gtid::ZERO).unwrap());
    }
}
