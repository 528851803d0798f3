//! Replica-set members and the membership service seen from the sync engine
//!
//! Membership, heartbeats and the veto table are owned elsewhere in the node.
//! The engine only ever holds a [`MemberId`] and resolves it through
//! [`Membership::member`] when it needs the current view of a peer.

use crate::Result;
use crate::gtid::Gtid;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Stable identity of a replica-set member (`host:port`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberId(String);

impl MemberId {
    /// Create a member id from its network address
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    /// Network address of the member
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(addr: &str) -> Self {
        Self::new(addr)
    }
}

/// Heartbeat view of a member's health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberHealth {
    /// Member answers heartbeats and can serve its oplog
    Readable,
    /// Member missed heartbeats or is in a non-readable state
    Unreachable,
    /// No heartbeat received yet
    Unknown,
}

impl MemberHealth {
    /// Whether the member can be read from
    pub fn is_readable(&self) -> bool {
        matches!(self, MemberHealth::Readable)
    }
}

/// A replica-set peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Network identity
    pub id: MemberId,
    /// Human-readable name (usually the configured host name)
    pub name: String,
    /// Last known health
    pub health: MemberHealth,
}

impl Member {
    /// Create a readable member whose name is its address
    pub fn new(addr: impl Into<String>) -> Self {
        let addr = addr.into();
        Self {
            id: MemberId::new(addr.clone()),
            name: addr,
            health: MemberHealth::Readable,
        }
    }

    /// Set the member's health
    pub fn with_health(mut self, health: MemberHealth) -> Self {
        self.health = health;
        self
    }

    /// Set the member's display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Replication state of the local node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    /// Node accepts writes; it never tails another member
    Primary,
    /// Node replicates from a sync target
    Secondary,
    /// Node is still starting up
    Startup,
    /// Node hit an unrecoverable error and awaits an operator
    Fatal,
}

/// How long a member stays excluded from selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VetoCooldown {
    /// The membership service's own default cooldown
    ServiceDefault,
    /// An explicit cooldown chosen by the engine
    For(Duration),
}

/// Membership and health service consumed by the engine
pub trait Membership: Send + Sync {
    /// Whether a valid replica-set configuration has been received
    fn is_configured(&self) -> bool {
        true
    }

    /// Current state of the local node
    fn node_state(&self) -> NodeState;

    /// Whether the local node is primary right now
    fn is_primary(&self) -> bool {
        self.node_state() == NodeState::Primary
    }

    /// Whether an operator asked to resync from a specific member
    fn forced_resync_requested(&self) -> bool;

    /// Sync candidates that are not currently vetoed, most preferred first
    fn candidate_members(&self) -> Vec<Member>;

    /// Resolve a member by id; `None` once it left the configuration
    fn member(&self, id: &MemberId) -> Option<Member>;

    /// Exclude a member from selection for a cooldown
    fn veto(&self, id: &MemberId, cooldown: VetoCooldown);

    /// Transition the node to the stale state: the only usable source has
    /// already discarded the history starting at `oldest`
    fn mark_stale(&self, id: &MemberId, oldest: Gtid) -> Result<()>;
}
