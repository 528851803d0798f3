//! Background sync producer loop.
//!
//! One thread runs [`BackgroundSync::run`] for the lifetime of the node.
//! Each iteration is a single cycle of the state machine:
//!
//! ```text
//!   NotSyncing ──(secondary)──► SelectingTarget ──(target)──► Tailing
//!       ▲                             │  ▲                       │
//!       └──(primary/startup/fatal)    │  └───(session ended)─────┘
//!                                     └──(no target: backoff)
//! ```
//!
//! A session ends on a forced resync request, on the node becoming primary,
//! when the target stops being readable, when the tailable cursor dies, or
//! when the source cannot continue our history. Errors escaping a cycle are
//! logged, recorded as the status message, and followed by a backoff.

use crate::clock::{Clock, ShutdownSignal, SystemClock};
use crate::config::SyncConfig;
use crate::gtid::Gtid;
use crate::member::{Member, MemberId, Membership, NodeState};
use crate::oplog::{LocalOplog, OplogEntry, OplogReader, ReaderFactory};
use crate::rollback::{RollbackCheck, check_rollback};
use crate::selector::{Selection, TargetSelector};
use crate::state::{QueueCounters, SyncPhase, SyncState, SyncStatus};
use crate::Result;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// Collaborators the producer loop runs against
#[derive(Clone)]
pub struct SyncDeps {
    /// Replica-set membership and health
    pub membership: Arc<dyn Membership>,
    /// Local durable oplog
    pub local: Arc<dyn LocalOplog>,
    /// Source of remote oplog readers
    pub readers: Arc<dyn ReaderFactory>,
    /// Time source for backoffs and fetch timing
    pub clock: Arc<dyn Clock>,
}

impl SyncDeps {
    /// Collaborators with the wall clock
    pub fn new(
        membership: Arc<dyn Membership>,
        local: Arc<dyn LocalOplog>,
        readers: Arc<dyn ReaderFactory>,
    ) -> Self {
        Self {
            membership,
            local,
            readers,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Why a tailing session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailExit {
    /// Shutdown was requested
    Shutdown,
    /// Operator asked to resync from a specific member
    ForcedResync,
    /// Local node became primary while tailing
    BecamePrimary,
    /// Target left the configuration or stopped being readable
    TargetUnreadable,
    /// Target cut the connection before the cursor was opened
    NoCursor,
    /// The tailable cursor died and could not be re-established
    CursorLost,
    /// Target has nothing at or after our position
    SourceBehind,
    /// Local history diverged from the target's
    RollbackRequired {
        /// Newest GTID we hold
        local: Gtid,
        /// First GTID the target returned instead
        remote: Gtid,
    },
}

/// Result of one producer cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No replica-set configuration yet
    Unconfigured,
    /// Local node is primary
    Primary,
    /// Local node is starting up or fatal
    NotReady(NodeState),
    /// Selection found nothing usable
    NoTarget,
    /// Selection transitioned the node to stale
    WentStale,
    /// A tailing session ran and ended
    Session(TailExit),
    /// The cycle failed; `transient` picks the backoff used
    Failed {
        /// Whether the failure was a transient data/store error
        transient: bool,
    },
}

/// The background oplog producer
pub struct BackgroundSync {
    membership: Arc<dyn Membership>,
    local: Arc<dyn LocalOplog>,
    readers: Arc<dyn ReaderFactory>,
    clock: Arc<dyn Clock>,
    config: Arc<SyncConfig>,
    state: Arc<SyncState>,
    shutdown: ShutdownSignal,
    selector: TargetSelector,
}

impl BackgroundSync {
    /// Create a producer; it does nothing until [`BackgroundSync::run`]
    pub fn new(deps: SyncDeps, config: SyncConfig, shutdown: ShutdownSignal) -> Self {
        let config = Arc::new(config);
        let state = Arc::new(SyncState::new());
        let selector = TargetSelector::new(
            deps.membership.clone(),
            deps.local.clone(),
            state.clone(),
            config.clone(),
            deps.clock.clone(),
            shutdown.clone(),
        );
        Self {
            membership: deps.membership,
            local: deps.local,
            readers: deps.readers,
            clock: deps.clock,
            config,
            state,
            shutdown,
            selector,
        }
    }

    /// Loop policy in use
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Snapshot of the queue counters
    pub fn counters(&self) -> QueueCounters {
        self.state.counters()
    }

    /// Id of the member currently tailed
    pub fn sync_target_id(&self) -> Option<MemberId> {
        self.state.target()
    }

    /// Member currently tailed, resolved through the membership service.
    /// `None` when there is no target or it left the configuration.
    pub fn sync_target(&self) -> Option<Member> {
        let id = self.state.target()?;
        self.membership.member(&id)
    }

    /// Status snapshot for reporting
    pub fn status(&self) -> SyncStatus {
        self.state.status()
    }

    /// Request cooperative shutdown
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Whether shutdown was requested
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_triggered()
    }

    /// Producer thread body: cycle until shutdown
    pub fn run(&self) {
        tracing::info!("Background sync producer started");
        while !self.shutdown.is_triggered() {
            let outcome = self.run_once();
            tracing::trace!("Producer cycle finished: {:?}", outcome);
        }
        self.state.clear_target();
        self.state.set_phase(SyncPhase::Stopped);
        tracing::info!("Background sync producer stopped");
    }

    /// One cycle with the outer failure handling applied
    pub fn run_once(&self) -> CycleOutcome {
        let failure = match panic::catch_unwind(AssertUnwindSafe(|| self.cycle())) {
            Ok(Ok(outcome)) => return outcome,
            Ok(Err(e)) if e.is_transient() => {
                (format!("db exception in producer: {}", e), true)
            }
            Ok(Err(e)) => (format!("exception in producer: {}", e), false),
            Err(payload) => (
                format!("exception in producer: panic: {}", panic_message(&*payload)),
                false,
            ),
        };

        let (message, transient) = failure;
        tracing::error!("{}", message);
        self.state.clear_target();
        self.state.set_message(message);

        let backoff = if transient {
            self.config.transient_error_backoff()
        } else {
            self.config.unexpected_error_backoff()
        };
        self.sleep(backoff);
        CycleOutcome::Failed { transient }
    }

    fn cycle(&self) -> Result<CycleOutcome> {
        if !self.membership.is_configured() {
            tracing::warn!(
                "Did not receive a valid replica set config yet, sleeping {:?}",
                self.config.unconfigured_backoff()
            );
            self.state.set_phase(SyncPhase::NotSyncing);
            self.sleep(self.config.unconfigured_backoff());
            return Ok(CycleOutcome::Unconfigured);
        }

        match self.membership.node_state() {
            NodeState::Primary => {
                self.state.set_phase(SyncPhase::NotSyncing);
                self.sleep(self.config.primary_backoff());
                Ok(CycleOutcome::Primary)
            }
            state @ (NodeState::Fatal | NodeState::Startup) => {
                self.state.set_phase(SyncPhase::NotSyncing);
                self.sleep(self.config.not_ready_backoff());
                Ok(CycleOutcome::NotReady(state))
            }
            NodeState::Secondary => self.produce(),
        }
    }

    fn produce(&self) -> Result<CycleOutcome> {
        self.state.set_phase(SyncPhase::SelectingTarget);
        let mut reader = self.readers.reader();

        let target = match self.selector.select(reader.as_mut())? {
            Selection::Target(member) => member,
            Selection::WentStale { .. } => {
                self.sleep(self.config.no_target_backoff());
                return Ok(CycleOutcome::WentStale);
            }
            Selection::NoTarget => {
                self.sleep(self.config.no_target_backoff());
                return Ok(CycleOutcome::NoTarget);
            }
        };

        let exit = self.tail(reader.as_mut(), &target);
        reader.reset();
        self.state.clear_target();
        self.state.set_phase(SyncPhase::SelectingTarget);

        let exit = exit?;
        tracing::info!("Stopped tailing {}: {:?}", target.id, exit);
        Ok(CycleOutcome::Session(exit))
    }

    fn tail(&self, reader: &mut dyn OplogReader, target: &Member) -> Result<TailExit> {
        let start = self.start_gtid()?;
        reader.query_from(start)?;

        // The target may have cut connections between connect and query
        // (for example because it stepped down).
        if !reader.has_cursor() {
            tracing::debug!("No cursor on {} after query from {}", target.id, start);
            return Ok(TailExit::NoCursor);
        }

        let probe_started = self.clock.now();
        match check_rollback(reader, start)? {
            RollbackCheck::InSync { first } => {
                if let Some(entry) = first {
                    self.hand_off(entry, self.elapsed_since(probe_started))?;
                }
            }
            RollbackCheck::SourceBehind => {
                tracing::info!("{} has no entry at or after {}", target.id, start);
                self.sleep(self.config.no_target_backoff());
                return Ok(TailExit::SourceBehind);
            }
            RollbackCheck::Diverged { local, remote } => {
                let message = format!(
                    "rollback required: {} does not hold local entry {} (first entry {})",
                    target.id, local, remote
                );
                tracing::error!("{}", message);
                self.state.set_message(message);
                self.sleep(self.config.unexpected_error_backoff());
                return Ok(TailExit::RollbackRequired { local, remote });
            }
        }

        self.state.set_phase(SyncPhase::Tailing);
        tracing::debug!("Tailing {} from {}", target.id, start);

        loop {
            loop {
                if self.shutdown.is_triggered() {
                    return Ok(TailExit::Shutdown);
                }

                if !reader.more_in_current_batch() {
                    if self.membership.forced_resync_requested() {
                        return Ok(TailExit::ForcedResync);
                    }
                    if self.membership.is_primary() {
                        tracing::warn!("Node became primary while tailing {}", target.id);
                        return Ok(TailExit::BecamePrimary);
                    }
                    if !self.target_readable() {
                        return Ok(TailExit::TargetUnreadable);
                    }
                }

                let fetch_started = self.clock.now();
                if !reader.more()? {
                    break;
                }
                let entry = reader.next()?;
                self.hand_off(entry, self.elapsed_since(fetch_started))?;
            }

            if !self.target_readable() {
                return Ok(TailExit::TargetUnreadable);
            }

            reader.tail_check()?;
            if !reader.has_cursor() {
                tracing::debug!("End of tail pass on {}", target.id);
                return Ok(TailExit::CursorLost);
            }
            // Tailable cursor: keep going.
        }
    }

    fn hand_off(&self, entry: OplogEntry, waited: Duration) -> Result<()> {
        let gtid = entry.gtid;
        self.local.append(entry)?;
        self.state.record_fetch(waited);
        self.state.advance_last_fetched(gtid);
        Ok(())
    }

    /// First GTID of the next session: the newest one we already hold,
    /// whether applied locally or only fetched.
    fn start_gtid(&self) -> Result<Gtid> {
        let applied = self.local.applied_gtid()?;
        Ok(self
            .state
            .last_fetched()
            .map_or(applied, |fetched| fetched.max(applied)))
    }

    fn target_readable(&self) -> bool {
        let Some(id) = self.state.target() else {
            return false;
        };
        self.membership
            .member(&id)
            .is_some_and(|member| member.health.is_readable())
    }

    fn elapsed_since(&self, started: std::time::Instant) -> Duration {
        self.clock.now().saturating_duration_since(started)
    }

    fn sleep(&self, duration: Duration) {
        self.clock.sleep(duration, &self.shutdown);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl std::fmt::Debug for BackgroundSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundSync")
            .field("config", &self.config)
            .field("status", &self.state.status())
            .finish_non_exhaustive()
    }
}
