//! Shared sync state read by status reporting.
//!
//! The current sync target and the queue counters live behind one mutex.
//! Every access is a single short critical section; nothing here is ever
//! held across a network call.

use crate::gtid::Gtid;
use crate::member::MemberId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use std::time::Duration;

/// Cumulative fetch metrics for the process lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounters {
    /// Total time spent blocked waiting for records
    #[serde(rename = "wait_time_ms", serialize_with = "serialize_millis")]
    pub wait_time: Duration,
    /// Total records fetched
    #[serde(rename = "num_elems")]
    pub records: u64,
}

fn serialize_millis<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis() as u64)
}

impl QueueCounters {
    /// Counters as a JSON object for status output
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "wait_time_ms": self.wait_time.as_millis() as u64,
            "num_elems": self.records,
        })
    }
}

/// Where the producer loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// Producer thread not started yet
    Idle,
    /// Node is primary, starting up, fatal or unconfigured
    NotSyncing,
    /// Looking for an upstream member
    SelectingTarget,
    /// Streaming records from the sync target
    Tailing,
    /// Producer thread exited after shutdown
    Stopped,
}

/// Last failure or notable event, as shown in the node's heartbeat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusMessage {
    /// Message text
    pub text: String,
    /// When it was recorded
    pub at: DateTime<Utc>,
}

/// Point-in-time view of the engine for status reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    /// Producer loop phase
    pub phase: SyncPhase,
    /// Member currently tailed
    pub sync_target: Option<MemberId>,
    /// Queue counters
    pub counters: QueueCounters,
    /// Newest GTID handed to the local oplog
    pub last_fetched: Option<Gtid>,
    /// Last recorded status message
    pub last_message: Option<StatusMessage>,
}

#[derive(Debug)]
struct SyncStateInner {
    target: Option<MemberId>,
    counters: QueueCounters,
    last_fetched: Option<Gtid>,
    phase: SyncPhase,
    last_message: Option<StatusMessage>,
}

/// Mutable state shared between the producer thread and readers
#[derive(Debug)]
pub struct SyncState {
    inner: Mutex<SyncStateInner>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncState {
    /// Create empty state
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SyncStateInner {
                target: None,
                counters: QueueCounters::default(),
                last_fetched: None,
                phase: SyncPhase::Idle,
                last_message: None,
            }),
        }
    }

    /// Current sync target
    pub fn target(&self) -> Option<MemberId> {
        self.inner.lock().target.clone()
    }

    /// Replace the sync target; returns the previous one
    pub fn set_target(&self, target: Option<MemberId>) -> Option<MemberId> {
        std::mem::replace(&mut self.inner.lock().target, target)
    }

    /// Clear the sync target
    pub fn clear_target(&self) -> Option<MemberId> {
        self.set_target(None)
    }

    /// Fold one fetched record into the counters
    pub fn record_fetch(&self, waited: Duration) {
        let mut inner = self.inner.lock();
        inner.counters.wait_time += waited;
        inner.counters.records += 1;
    }

    /// Snapshot of the counters
    pub fn counters(&self) -> QueueCounters {
        self.inner.lock().counters
    }

    /// Remember the newest GTID handed off; never moves backwards
    pub fn advance_last_fetched(&self, gtid: Gtid) {
        let mut inner = self.inner.lock();
        if inner.last_fetched.is_none_or(|current| gtid > current) {
            inner.last_fetched = Some(gtid);
        }
    }

    /// Newest GTID handed off, if any
    pub fn last_fetched(&self) -> Option<Gtid> {
        self.inner.lock().last_fetched
    }

    /// Update the producer phase
    pub fn set_phase(&self, phase: SyncPhase) {
        self.inner.lock().phase = phase;
    }

    /// Current producer phase
    pub fn phase(&self) -> SyncPhase {
        self.inner.lock().phase
    }

    /// Record a status message
    pub fn set_message(&self, text: impl Into<String>) {
        self.inner.lock().last_message = Some(StatusMessage {
            text: text.into(),
            at: Utc::now(),
        });
    }

    /// Last status message
    pub fn last_message(&self) -> Option<StatusMessage> {
        self.inner.lock().last_message.clone()
    }

    /// Consistent snapshot of everything above
    pub fn status(&self) -> SyncStatus {
        let inner = self.inner.lock();
        SyncStatus {
            phase: inner.phase,
            sync_target: inner.target.clone(),
            counters: inner.counters,
            last_fetched: inner.last_fetched,
            last_message: inner.last_message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counters_are_additive() {
        let state = SyncState::new();
        let waits = [3u64, 0, 17, 250, 1];
        for w in waits {
            state.record_fetch(Duration::from_millis(w));
        }
        let counters = state.counters();
        assert_eq!(counters.records, waits.len() as u64);
        assert_eq!(counters.wait_time, Duration::from_millis(waits.iter().sum()));
    }

    #[test]
    fn test_counters_under_concurrent_readers() {
        let state = Arc::new(SyncState::new());
        let writer = {
            let state = state.clone();
            thread::spawn(move || {
                for _ in 0..10_000 {
                    state.record_fetch(Duration::from_micros(2));
                }
            })
        };
        let reader = {
            let state = state.clone();
            thread::spawn(move || {
                let mut last = 0;
                for _ in 0..10_000 {
                    let snapshot = state.counters();
                    assert!(snapshot.records >= last);
                    // Both fields come from the same critical section.
                    assert_eq!(snapshot.wait_time, Duration::from_micros(2 * snapshot.records));
                    last = snapshot.records;
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();

        let counters = state.counters();
        assert_eq!(counters.records, 10_000);
        assert_eq!(counters.wait_time, Duration::from_micros(20_000));
    }

    #[test]
    fn test_set_target_replaces_previous() {
        let state = SyncState::new();
        assert_eq!(state.set_target(Some(MemberId::new("a:1"))), None);
        assert_eq!(
            state.set_target(Some(MemberId::new("b:1"))),
            Some(MemberId::new("a:1"))
        );
        assert_eq!(state.target(), Some(MemberId::new("b:1")));
        assert_eq!(state.clear_target(), Some(MemberId::new("b:1")));
        assert_eq!(state.target(), None);
    }

    #[test]
    fn test_last_fetched_is_monotonic() {
        let state = SyncState::new();
        state.advance_last_fetched(Gtid::new(1, 5));
        state.advance_last_fetched(Gtid::new(1, 3));
        assert_eq!(state.last_fetched(), Some(Gtid::new(1, 5)));
        state.advance_last_fetched(Gtid::new(2, 0));
        assert_eq!(state.last_fetched(), Some(Gtid::new(2, 0)));
    }

    #[test]
    fn test_counters_json() {
        let counters = QueueCounters {
            wait_time: Duration::from_millis(1500),
            records: 3,
        };
        assert_eq!(counters.to_json()["wait_time_ms"], 1500);
        assert_eq!(serde_json::to_value(counters).unwrap()["num_elems"], 3);
    }

    #[test]
    fn test_status_snapshot() {
        let state = SyncState::new();
        state.set_phase(SyncPhase::Tailing);
        state.set_target(Some(MemberId::new("db3:27017")));
        state.set_message("db exception in producer: timed out");

        assert_eq!(state.phase(), SyncPhase::Tailing);
        assert_eq!(
            state.last_message().map(|m| m.text),
            Some("db exception in producer: timed out".to_string())
        );

        let status = state.status();
        assert_eq!(status.phase, SyncPhase::Tailing);
        assert_eq!(status.sync_target, Some(MemberId::new("db3:27017")));
        assert!(status.last_message.unwrap().text.contains("timed out"));

        let json = serde_json::to_value(state.status()).unwrap();
        assert_eq!(json["phase"], "tailing");
    }
}
