//! Sync target selection
//!
//! Candidates are tried in the membership service's preference order. The
//! first one that accepts a connection and still retains the history we
//! need wins; selection does not keep looking for a better one.
//!
//! Rejections never surface as errors. An unreachable candidate is vetoed
//! for the service's default cooldown, a stale one for the configured stale
//! cooldown. When every reachable candidate was stale, the least-stale one
//! is handed to the membership service as the reason the node went stale.

use crate::clock::{Clock, ShutdownSignal};
use crate::config::SyncConfig;
use crate::gtid::Gtid;
use crate::member::{Member, MemberId, Membership, VetoCooldown};
use crate::oplog::{LocalOplog, OplogReader};
use crate::staleness::{Staleness, check_staleness};
use crate::state::SyncState;
use crate::{Error, Result};
use std::sync::Arc;

/// Outcome of one selection round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// The reader is connected to this member, now the sync target
    Target(Member),
    /// Only stale candidates were found; the node was marked stale
    WentStale {
        /// Least-stale candidate seen
        member: MemberId,
        /// Its oldest retained GTID
        remote_oldest: Gtid,
    },
    /// No candidate was usable
    NoTarget,
}

impl Selection {
    /// Selected member, if any
    pub fn target(&self) -> Option<&Member> {
        match self {
            Selection::Target(member) => Some(member),
            _ => None,
        }
    }
}

/// Chooses an upstream member to tail
pub struct TargetSelector {
    membership: Arc<dyn Membership>,
    local: Arc<dyn LocalOplog>,
    state: Arc<SyncState>,
    config: Arc<SyncConfig>,
    clock: Arc<dyn Clock>,
    shutdown: ShutdownSignal,
}

impl TargetSelector {
    /// Create a selector over the given collaborators
    pub fn new(
        membership: Arc<dyn Membership>,
        local: Arc<dyn LocalOplog>,
        state: Arc<SyncState>,
        config: Arc<SyncConfig>,
        clock: Arc<dyn Clock>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            membership,
            local,
            state,
            config,
            clock,
            shutdown,
        }
    }

    /// Run one selection round with an unconnected `reader`.
    ///
    /// On [`Selection::Target`] the reader is left connected to the target
    /// and the target is published in the shared state. Every other outcome
    /// leaves the reader reset and the shared target cleared.
    ///
    /// Only failures of the local oplog are returned as errors; everything
    /// wrong with a candidate is a rejection. A shutdown observed during the
    /// walk yields [`Selection::NoTarget`] without any stale transition.
    pub fn select(&self, reader: &mut dyn OplogReader) -> Result<Selection> {
        let mut stale: Option<(MemberId, Gtid)> = None;

        for candidate in self.membership.candidate_members() {
            if self.shutdown.is_triggered() {
                // Candidates after this one were never probed, so nothing
                // proves the node is stale.
                tracing::debug!("Shutdown requested during sync target selection");
                reader.reset();
                self.state.clear_target();
                return Ok(Selection::NoTarget);
            }

            if let Err(e) = reader.connect(&candidate) {
                tracing::debug!("Can't connect to {} to read operations: {}", candidate.id, e);
                reader.reset();
                self.membership
                    .veto(&candidate.id, VetoCooldown::ServiceDefault);
                continue;
            }

            let staleness = match check_staleness(reader, self.local.as_ref()) {
                Ok(staleness) => staleness,
                Err(e @ Error::Store(_)) => {
                    reader.reset();
                    self.state.clear_target();
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!("Failed to probe oplog of {}: {}", candidate.id, e);
                    reader.reset();
                    self.membership
                        .veto(&candidate.id, VetoCooldown::ServiceDefault);
                    continue;
                }
            };

            match staleness {
                Staleness::Fresh { remote_oldest } => {
                    tracing::debug!(
                        "Selected {} as sync target (oldest entry {})",
                        candidate.id,
                        remote_oldest
                    );
                    let previous = self.state.set_target(Some(candidate.id.clone()));
                    if previous.as_ref() != Some(&candidate.id) {
                        tracing::info!("Syncing from {}", candidate.name);
                    }
                    return Ok(Selection::Target(candidate));
                }
                Staleness::Stale { remote_oldest } => {
                    tracing::warn!(
                        "Sync candidate {} is stale (oldest entry {}), vetoing for {:?}",
                        candidate.id,
                        remote_oldest,
                        self.config.stale_veto()
                    );
                    reader.reset();
                    self.membership
                        .veto(&candidate.id, VetoCooldown::For(self.config.stale_veto()));
                    if stale
                        .as_ref()
                        .is_none_or(|(_, best)| remote_oldest < *best)
                    {
                        stale = Some((candidate.id, remote_oldest));
                    }
                }
                Staleness::EmptyOplog => {
                    tracing::warn!("Sync candidate {} has an empty oplog", candidate.id);
                    reader.reset();
                    self.membership
                        .veto(&candidate.id, VetoCooldown::ServiceDefault);
                }
            }
        }

        self.state.clear_target();

        let Some((member, remote_oldest)) = stale else {
            return Ok(Selection::NoTarget);
        };

        tracing::error!(
            "Too stale to sync from any member; least-stale is {} (oldest entry {})",
            member,
            remote_oldest
        );
        if let Err(e) = self.membership.mark_stale(&member, remote_oldest) {
            tracing::warn!("Failed to mark node stale against {}: {}", member, e);
        }
        self.clock
            .sleep(self.config.stale_backoff(), &self.shutdown);

        Ok(Selection::WentStale {
            member,
            remote_oldest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::MemberHealth;
    use crate::testing::{ManualClock, MemOplog, ScriptedMembership, ScriptedPeer, ScriptedReader};
    use std::time::Duration;

    struct Fixture {
        membership: Arc<ScriptedMembership>,
        local: Arc<MemOplog>,
        state: Arc<SyncState>,
        clock: ManualClock,
        shutdown: ShutdownSignal,
        selector: TargetSelector,
    }

    fn fixture(members: Vec<Member>, local_at: Gtid) -> Fixture {
        let membership = Arc::new(ScriptedMembership::new(members));
        let local = Arc::new(MemOplog::at(local_at));
        let state = Arc::new(SyncState::new());
        let clock = ManualClock::new();
        let shutdown = ShutdownSignal::new();
        let selector = TargetSelector::new(
            membership.clone(),
            local.clone(),
            state.clone(),
            Arc::new(SyncConfig::default()),
            Arc::new(clock.clone()),
            shutdown.clone(),
        );
        Fixture {
            membership,
            local,
            state,
            clock,
            shutdown,
            selector,
        }
    }

    #[test]
    fn test_skips_unreachable_and_stale_candidates() {
        let a = ScriptedPeer::new("a:27017").unreachable();
        let b = ScriptedPeer::new("b:27017").with_range(Gtid::new(1, 50), Gtid::new(1, 300));
        let c = ScriptedPeer::new("c:27017").with_range(Gtid::new(1, 10), Gtid::new(1, 300));
        let fx = fixture(
            vec![
                Member::new("a:27017").with_health(MemberHealth::Unreachable),
                Member::new("b:27017"),
                Member::new("c:27017"),
            ],
            // b retains nothing before 1:50, so it cannot serve 1:40 onwards.
            Gtid::new(1, 40),
        );

        let mut reader = ScriptedReader::new(vec![a, b, c]);
        let selection = fx.selector.select(&mut reader).unwrap();

        assert_eq!(selection.target().unwrap().id, MemberId::new("c:27017"));
        assert_eq!(fx.state.target(), Some(MemberId::new("c:27017")));
        assert_eq!(reader.connected_to(), Some(MemberId::new("c:27017")));
        assert_eq!(
            fx.membership.vetoes(),
            vec![
                (MemberId::new("a:27017"), VetoCooldown::ServiceDefault),
                (
                    MemberId::new("b:27017"),
                    VetoCooldown::For(Duration::from_secs(600))
                ),
            ]
        );
        assert!(fx.membership.stale_marks().is_empty());
        assert!(fx.clock.sleeps().is_empty());
    }

    #[test]
    fn test_first_viable_wins() {
        let b = ScriptedPeer::new("b:1").with_range(Gtid::new(1, 1), Gtid::new(1, 9));
        let c = ScriptedPeer::new("c:1").with_range(Gtid::new(1, 1), Gtid::new(1, 9));
        let fx = fixture(
            vec![Member::new("b:1"), Member::new("c:1")],
            Gtid::new(1, 5),
        );

        let mut reader = ScriptedReader::new(vec![b, c.clone()]);
        let selection = fx.selector.select(&mut reader).unwrap();

        assert_eq!(selection.target().unwrap().id, MemberId::new("b:1"));
        assert_eq!(c.connects(), 0);
        assert!(fx.membership.vetoes().is_empty());
    }

    #[test]
    fn test_all_stale_goes_stale_with_least_stale_candidate() {
        let a = ScriptedPeer::new("a:1").with_range(Gtid::new(1, 400), Gtid::new(1, 500));
        let b = ScriptedPeer::new("b:1").with_range(Gtid::new(1, 150), Gtid::new(1, 500));
        let c = ScriptedPeer::new("c:1").with_range(Gtid::new(2, 1), Gtid::new(2, 50));
        let fx = fixture(
            vec![Member::new("a:1"), Member::new("b:1"), Member::new("c:1")],
            Gtid::new(1, 100),
        );
        fx.state.set_target(Some(MemberId::new("a:1")));

        let mut reader = ScriptedReader::new(vec![a, b, c]);
        let selection = fx.selector.select(&mut reader).unwrap();

        assert_eq!(
            selection,
            Selection::WentStale {
                member: MemberId::new("b:1"),
                remote_oldest: Gtid::new(1, 150),
            }
        );
        assert_eq!(
            fx.membership.stale_marks(),
            vec![(MemberId::new("b:1"), Gtid::new(1, 150))]
        );
        assert_eq!(fx.state.target(), None);
        assert_eq!(fx.clock.sleeps(), vec![Duration::from_secs(120)]);
        assert_eq!(reader.connected_to(), None);
    }

    #[test]
    fn test_no_candidates() {
        let fx = fixture(vec![], Gtid::new(1, 100));
        fx.state.set_target(Some(MemberId::new("gone:1")));

        let mut reader = ScriptedReader::new(vec![]);
        assert_eq!(fx.selector.select(&mut reader).unwrap(), Selection::NoTarget);
        assert_eq!(fx.state.target(), None);
        assert!(fx.membership.stale_marks().is_empty());
        assert!(fx.clock.sleeps().is_empty());
    }

    #[test]
    fn test_all_unreachable() {
        let fx = fixture(
            vec![Member::new("a:1"), Member::new("b:1")],
            Gtid::new(1, 100),
        );
        let mut reader = ScriptedReader::new(vec![
            ScriptedPeer::new("a:1").unreachable(),
            ScriptedPeer::new("b:1").unreachable(),
        ]);

        assert_eq!(fx.selector.select(&mut reader).unwrap(), Selection::NoTarget);
        assert_eq!(fx.membership.vetoes().len(), 2);
        assert!(fx.membership.stale_marks().is_empty());
    }

    #[test]
    fn test_empty_remote_oplog_is_vetoed_not_stale() {
        let fx = fixture(vec![Member::new("e:1")], Gtid::new(1, 100));
        let mut reader = ScriptedReader::new(vec![ScriptedPeer::new("e:1")]);

        assert_eq!(fx.selector.select(&mut reader).unwrap(), Selection::NoTarget);
        assert_eq!(
            fx.membership.vetoes(),
            vec![(MemberId::new("e:1"), VetoCooldown::ServiceDefault)]
        );
        assert!(fx.membership.stale_marks().is_empty());
    }

    #[test]
    fn test_local_store_failure_propagates() {
        let fx = fixture(vec![Member::new("a:1")], Gtid::new(1, 100));
        fx.local.fail_reads(true);
        let mut reader = ScriptedReader::new(vec![
            ScriptedPeer::new("a:1").with_range(Gtid::new(1, 1), Gtid::new(1, 200)),
        ]);

        let err = fx.selector.select(&mut reader).unwrap_err();
        assert!(err.is_transient());
        assert!(fx.membership.vetoes().is_empty());
        assert_eq!(reader.connected_to(), None);
    }

    #[test]
    fn test_shutdown_mid_walk_does_not_go_stale() {
        let stale = ScriptedPeer::new("stale:1").with_range(Gtid::new(1, 50), Gtid::new(1, 90));
        let fresh = ScriptedPeer::new("fresh:1").with_range(Gtid::new(1, 1), Gtid::new(1, 90));
        let fx = fixture(
            vec![Member::new("stale:1"), Member::new("fresh:1")],
            Gtid::new(1, 40),
        );
        let shutdown = fx.shutdown.clone();
        fx.membership.on_veto(move |_| shutdown.trigger());

        let mut reader = ScriptedReader::new(vec![stale, fresh.clone()]);
        let selection = fx.selector.select(&mut reader).unwrap();

        assert_eq!(selection, Selection::NoTarget);
        assert!(fx.membership.stale_marks().is_empty());
        assert_eq!(fresh.connects(), 0);
        assert!(fx.clock.sleeps().is_empty());
        assert_eq!(fx.state.target(), None);
        assert_eq!(reader.connected_to(), None);
    }

    #[test]
    fn test_failed_stale_transition_still_backs_off() {
        let fx = fixture(vec![Member::new("a:1")], Gtid::new(1, 10));
        fx.membership.fail_mark_stale(true);
        let mut reader = ScriptedReader::new(vec![
            ScriptedPeer::new("a:1").with_range(Gtid::new(1, 30), Gtid::new(1, 90)),
        ]);

        let selection = fx.selector.select(&mut reader).unwrap();

        assert_eq!(
            selection,
            Selection::WentStale {
                member: MemberId::new("a:1"),
                remote_oldest: Gtid::new(1, 30),
            }
        );
        assert!(fx.membership.stale_marks().is_empty());
        assert_eq!(fx.clock.sleeps(), vec![Duration::from_secs(120)]);
        assert_eq!(fx.state.target(), None);
    }

    #[test]
    fn test_stale_candidate_usable_once_local_catches_up() {
        let peer = ScriptedPeer::new("b:1").with_range(Gtid::new(1, 50), Gtid::new(1, 90));
        let fx = fixture(vec![Member::new("b:1")], Gtid::new(1, 40));
        let mut reader = ScriptedReader::new(vec![peer]);

        assert!(matches!(
            fx.selector.select(&mut reader).unwrap(),
            Selection::WentStale { .. }
        ));

        // Equal to the candidate's oldest entry is still stale.
        fx.membership.lift_vetoes();
        fx.local.set_applied(Gtid::new(1, 50));
        assert!(matches!(
            fx.selector.select(&mut reader).unwrap(),
            Selection::WentStale { .. }
        ));

        fx.membership.lift_vetoes();
        fx.local.set_applied(Gtid::new(1, 51));
        let selection = fx.selector.select(&mut reader).unwrap();
        assert_eq!(selection.target().unwrap().id, MemberId::new("b:1"));
        assert_eq!(fx.state.target(), Some(MemberId::new("b:1")));
        assert_eq!(fx.membership.stale_marks().len(), 2);
    }
}
