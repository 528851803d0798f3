//! Tailsync Core - Background Oplog Replication
//!
//! This crate keeps a secondary replica's operation log caught up with the
//! rest of its replica set. It provides:
//! - Global transaction ids (GTIDs) and their total order
//! - Staleness detection against a candidate's oldest oplog entry
//! - Sync-target selection with vetoes and stale transitions
//! - The producer loop tailing the chosen target into the local oplog
//! - Queue counters and a status snapshot for reporting
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │        SyncEngine (one per node)            │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │      BackgroundSync (producer thread)       │
//! │  (state machine, tailing, backoff, status)  │
//! └───────┬──────────────────────────┬──────────┘
//!         │                          │
//! ┌───────┴───────────┐   ┌──────────┴──────────┐
//! │  TargetSelector   │   │   Rollback check    │
//! │ (staleness, veto) │   │ (cursor head probe) │
//! └───────┬───────────┘   └──────────┬──────────┘
//!         │                          │
//! ┌───────┴──────────────────────────┴──────────┐
//! │   Membership · OplogReader · LocalOplog     │
//! │        (provided by the host node)          │
//! └─────────────────────────────────────────────┘
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod gtid;
pub mod member;
pub mod oplog;
pub mod producer;
pub mod rollback;
pub mod selector;
pub mod staleness;
pub mod state;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use clock::{Clock, ShutdownSignal, SystemClock};
pub use config::SyncConfig;
pub use engine::SyncEngine;
pub use error::{Error, Result};
pub use gtid::{Gtid, compare};
pub use member::{Member, MemberHealth, MemberId, Membership, NodeState, VetoCooldown};
pub use oplog::{LocalOplog, OplogEntry, OplogReader, ReaderFactory};
pub use producer::{BackgroundSync, CycleOutcome, SyncDeps, TailExit};
pub use rollback::{RollbackCheck, check_rollback, requires_rollback};
pub use selector::{Selection, TargetSelector};
pub use staleness::{Staleness, check_staleness, is_stale, is_stale_at};
pub use state::{QueueCounters, StatusMessage, SyncPhase, SyncState, SyncStatus};
