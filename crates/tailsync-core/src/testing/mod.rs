//! In-memory collaborators for exercising the sync engine.
//!
//! Everything here is deterministic: members are scripted, remote oplogs are
//! plain vectors, and time only moves when a [`ManualClock`] is told to.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tailsync_core::testing::{ManualClock, MemOplog, ScriptedMembership, ScriptedPeer, ScriptedReaderFactory};
//! use tailsync_core::{BackgroundSync, Gtid, Member, ShutdownSignal, SyncConfig, SyncDeps};
//!
//! let peer = ScriptedPeer::new("db2:27017").with_range(Gtid::new(1, 1), Gtid::new(1, 50));
//! let membership = Arc::new(ScriptedMembership::new(vec![Member::new("db2:27017")]));
//! let deps = SyncDeps::new(
//!     membership,
//!     Arc::new(MemOplog::at(Gtid::new(1, 10))),
//!     Arc::new(ScriptedReaderFactory::new(vec![peer])),
//! )
//! .with_clock(Arc::new(ManualClock::new()));
//! let sync = BackgroundSync::new(deps, SyncConfig::default(), ShutdownSignal::new());
//! sync.run_once();
//! ```

mod clock;
mod membership;
mod oplog;
mod peer;

pub use clock::ManualClock;
pub use membership::ScriptedMembership;
pub use oplog::MemOplog;
pub use peer::{ScriptedPeer, ScriptedReader, ScriptedReaderFactory};

