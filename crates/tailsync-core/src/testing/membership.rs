//! Scripted membership service

use crate::{Error, Result};
use crate::gtid::Gtid;
use crate::member::{Member, MemberHealth, MemberId, Membership, NodeState, VetoCooldown};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

type VetoHook = Arc<dyn Fn(&MemberId) + Send + Sync>;

#[derive(Debug)]
struct MembershipInner {
    configured: bool,
    state: NodeState,
    forced_resync: bool,
    members: Vec<Member>,
    vetoed: HashSet<MemberId>,
    vetoes: Vec<(MemberId, VetoCooldown)>,
    stale_marks: Vec<(MemberId, Gtid)>,
    fail_mark_stale: bool,
}

/// Membership service with a fixed preference order.
///
/// Candidates are the configured members minus the vetoed ones. A veto
/// lasts until [`ScriptedMembership::lift_vetoes`]. A forced resync request
/// is consumed by the first check that observes it.
pub struct ScriptedMembership {
    inner: Mutex<MembershipInner>,
    veto_hook: Mutex<Option<VetoHook>>,
}

impl std::fmt::Debug for ScriptedMembership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedMembership")
            .field("inner", &*self.inner.lock())
            .finish_non_exhaustive()
    }
}

impl ScriptedMembership {
    /// Configured secondary with `members` in preference order
    pub fn new(members: Vec<Member>) -> Self {
        Self {
            inner: Mutex::new(MembershipInner {
                configured: true,
                state: NodeState::Secondary,
                forced_resync: false,
                members,
                vetoed: HashSet::new(),
                vetoes: Vec::new(),
                stale_marks: Vec::new(),
                fail_mark_stale: false,
            }),
            veto_hook: Mutex::new(None),
        }
    }

    /// Change the local node state
    pub fn set_state(&self, state: NodeState) {
        self.inner.lock().state = state;
    }

    /// Toggle whether a replica-set config has been received
    pub fn set_configured(&self, configured: bool) {
        self.inner.lock().configured = configured;
    }

    /// Change a member's health
    pub fn set_health(&self, id: &MemberId, health: MemberHealth) {
        let mut inner = self.inner.lock();
        if let Some(member) = inner.members.iter_mut().find(|m| &m.id == id) {
            member.health = health;
        }
    }

    /// Drop a member from the configuration
    pub fn remove_member(&self, id: &MemberId) {
        self.inner.lock().members.retain(|m| &m.id != id);
    }

    /// Post a forced resync request
    pub fn request_forced_resync(&self) {
        self.inner.lock().forced_resync = true;
    }

    /// Make `mark_stale` fail
    pub fn fail_mark_stale(&self, fail: bool) {
        self.inner.lock().fail_mark_stale = fail;
    }

    /// Every veto issued, in order
    pub fn vetoes(&self) -> Vec<(MemberId, VetoCooldown)> {
        self.inner.lock().vetoes.clone()
    }

    /// Every stale transition, in order
    pub fn stale_marks(&self) -> Vec<(MemberId, Gtid)> {
        self.inner.lock().stale_marks.clone()
    }

    /// Call `hook` with the member id after every veto
    pub fn on_veto(&self, hook: impl Fn(&MemberId) + Send + Sync + 'static) {
        *self.veto_hook.lock() = Some(Arc::new(hook));
    }

    /// Make every vetoed member a candidate again
    pub fn lift_vetoes(&self) {
        self.inner.lock().vetoed.clear();
    }
}

impl Membership for ScriptedMembership {
    fn is_configured(&self) -> bool {
        self.inner.lock().configured
    }

    fn node_state(&self) -> NodeState {
        self.inner.lock().state
    }

    fn forced_resync_requested(&self) -> bool {
        std::mem::take(&mut self.inner.lock().forced_resync)
    }

    fn candidate_members(&self) -> Vec<Member> {
        let inner = self.inner.lock();
        inner
            .members
            .iter()
            .filter(|m| !inner.vetoed.contains(&m.id))
            .cloned()
            .collect()
    }

    fn member(&self, id: &MemberId) -> Option<Member> {
        self.inner.lock().members.iter().find(|m| &m.id == id).cloned()
    }

    fn veto(&self, id: &MemberId, cooldown: VetoCooldown) {
        {
            let mut inner = self.inner.lock();
            inner.vetoed.insert(id.clone());
            inner.vetoes.push((id.clone(), cooldown));
        }
        let hook = self.veto_hook.lock().clone();
        if let Some(hook) = hook {
            hook(id);
        }
    }

    fn mark_stale(&self, id: &MemberId, oldest: Gtid) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_mark_stale {
            return Err(Error::membership("replica set is reconfiguring"));
        }
        inner.stale_marks.push((id.clone(), oldest));
        Ok(())
    }
}
