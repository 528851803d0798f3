//! Scripted remote members and readers over their oplogs

use super::ManualClock;
use crate::gtid::Gtid;
use crate::member::{Member, MemberId};
use crate::oplog::{OplogEntry, OplogReader, ReaderFactory};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

type BatchHook = Arc<dyn Fn(usize) + Send + Sync>;

struct PeerInner {
    reachable: bool,
    entries: Vec<OplogEntry>,
    batch_size: usize,
    tail_checks: usize,
    drop_cursor_on_query: bool,
    fail_fetches_after: Option<usize>,
    latency: Option<(ManualClock, Duration)>,
    hook: Option<BatchHook>,
    connects: usize,
    fetches: usize,
    queries: Vec<Gtid>,
}

/// A remote member: its reachability, its oplog, and how its cursor
/// behaves. Clones share state, so a test can keep a handle while the
/// engine reads through another.
#[derive(Clone)]
pub struct ScriptedPeer {
    addr: MemberId,
    inner: Arc<Mutex<PeerInner>>,
}

impl std::fmt::Debug for ScriptedPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ScriptedPeer")
            .field("addr", &self.addr)
            .field("reachable", &inner.reachable)
            .field("entries", &inner.entries.len())
            .finish_non_exhaustive()
    }
}

impl ScriptedPeer {
    /// Reachable member with an empty oplog
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: MemberId::new(addr),
            inner: Arc::new(Mutex::new(PeerInner {
                reachable: true,
                entries: Vec::new(),
                batch_size: 100,
                tail_checks: 0,
                drop_cursor_on_query: false,
                fail_fetches_after: None,
                latency: None,
                hook: None,
                connects: 0,
                fetches: 0,
                queries: Vec::new(),
            })),
        }
    }

    /// Address of the member
    pub fn addr(&self) -> &str {
        self.addr.as_str()
    }

    /// Refuse every connection
    pub fn unreachable(self) -> Self {
        self.inner.lock().reachable = false;
        self
    }

    /// Oplog holding every GTID from `first` to `last` within one term
    pub fn with_range(self, first: Gtid, last: Gtid) -> Self {
        let entries = (first.seq..=last.seq)
            .map(|seq| {
                let gtid = Gtid::new(first.primary, seq);
                OplogEntry::new(gtid, format!("op-{}", gtid).into_bytes())
            })
            .collect();
        self.with_entries(entries)
    }

    /// Oplog holding exactly `entries` (ascending GTID order)
    pub fn with_entries(self, entries: Vec<OplogEntry>) -> Self {
        self.inner.lock().entries = entries;
        self
    }

    /// Records delivered per network fetch
    pub fn with_batch_size(self, batch_size: usize) -> Self {
        self.inner.lock().batch_size = batch_size.max(1);
        self
    }

    /// Number of `tail_check` calls that keep a drained cursor alive
    pub fn with_tail_checks(self, tail_checks: usize) -> Self {
        self.inner.lock().tail_checks = tail_checks;
        self
    }

    /// Close the cursor right after `query_from`, as a member stepping down
    /// would
    pub fn dropping_cursor_on_query(self) -> Self {
        self.inner.lock().drop_cursor_on_query = true;
        self
    }

    /// Advance `clock` by `latency` on every network fetch
    pub fn set_fetch_latency(&self, clock: ManualClock, latency: Duration) {
        self.inner.lock().latency = Some((clock, latency));
    }

    /// Let the first `count` fetches succeed, fail every later one
    pub fn fail_fetches_after(&self, count: usize) {
        self.inner.lock().fail_fetches_after = Some(count);
    }

    /// Call `hook` with the 1-based fetch number after every network fetch
    pub fn on_batch(&self, hook: impl Fn(usize) + Send + Sync + 'static) {
        self.inner.lock().hook = Some(Arc::new(hook));
    }

    /// Append to the member's oplog
    pub fn push(&self, entry: OplogEntry) {
        self.inner.lock().entries.push(entry);
    }

    /// Change reachability
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.lock().reachable = reachable;
    }

    /// Connection attempts so far
    pub fn connects(&self) -> usize {
        self.inner.lock().connects
    }

    /// Network fetches so far
    pub fn fetches(&self) -> usize {
        self.inner.lock().fetches
    }

    /// Start GTIDs of every `query_from`, in order
    pub fn queries(&self) -> Vec<Gtid> {
        self.inner.lock().queries.clone()
    }
}

#[derive(Debug, Default)]
struct Cursor {
    next_index: usize,
    batch: VecDeque<OplogEntry>,
}

/// Reader resolving members against a fixed set of scripted peers
#[derive(Debug)]
pub struct ScriptedReader {
    peers: Vec<ScriptedPeer>,
    connected: Option<ScriptedPeer>,
    cursor: Option<Cursor>,
}

impl ScriptedReader {
    /// Reader that can reach `peers`
    pub fn new(peers: Vec<ScriptedPeer>) -> Self {
        Self {
            peers,
            connected: None,
            cursor: None,
        }
    }

    /// Member the reader is connected to
    pub fn connected_to(&self) -> Option<MemberId> {
        self.connected.as_ref().map(|peer| peer.addr.clone())
    }

    fn peer(&self) -> Result<&ScriptedPeer> {
        self.connected
            .as_ref()
            .ok_or_else(|| Error::internal("reader is not connected"))
    }
}

impl OplogReader for ScriptedReader {
    fn connect(&mut self, member: &Member) -> Result<()> {
        if self.connected.is_some() {
            return Err(Error::internal("reader is already connected"));
        }
        let peer = self
            .peers
            .iter()
            .find(|peer| peer.addr == member.id)
            .cloned()
            .ok_or_else(|| Error::network(format!("no route to {}", member.id)))?;
        {
            let mut inner = peer.inner.lock();
            inner.connects += 1;
            if !inner.reachable {
                return Err(Error::network(format!(
                    "connection refused by {}",
                    member.id
                )));
            }
        }
        self.connected = Some(peer);
        Ok(())
    }

    fn oldest_entry(&mut self) -> Result<Option<OplogEntry>> {
        Ok(self.peer()?.inner.lock().entries.first().cloned())
    }

    fn query_from(&mut self, start: Gtid) -> Result<()> {
        let peer = self.peer()?.clone();
        let mut inner = peer.inner.lock();
        inner.queries.push(start);
        if inner.drop_cursor_on_query {
            self.cursor = None;
            return Ok(());
        }
        let next_index = inner
            .entries
            .iter()
            .position(|entry| entry.gtid >= start)
            .unwrap_or(inner.entries.len());
        self.cursor = Some(Cursor {
            next_index,
            batch: VecDeque::new(),
        });
        Ok(())
    }

    fn has_cursor(&self) -> bool {
        self.cursor.is_some()
    }

    fn more_in_current_batch(&self) -> bool {
        self.cursor.as_ref().is_some_and(|c| !c.batch.is_empty())
    }

    fn more(&mut self) -> Result<bool> {
        let peer = self.peer()?.clone();
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(false);
        };
        if !cursor.batch.is_empty() {
            return Ok(true);
        }

        let (fetch, latency, hook) = {
            let mut inner = peer.inner.lock();
            inner.fetches += 1;
            let fetch = inner.fetches;
            if inner.fail_fetches_after.is_some_and(|limit| fetch > limit) {
                return Err(Error::network(format!(
                    "socket exception reading from {}",
                    peer.addr
                )));
            }
            let end = (cursor.next_index + inner.batch_size).min(inner.entries.len());
            cursor
                .batch
                .extend(inner.entries[cursor.next_index..end].iter().cloned());
            cursor.next_index = end;
            (fetch, inner.latency.clone(), inner.hook.clone())
        };

        if let Some((clock, latency)) = latency {
            clock.advance(latency);
        }
        if let Some(hook) = hook {
            hook(fetch);
        }
        Ok(self.cursor.as_ref().is_some_and(|c| !c.batch.is_empty()))
    }

    fn next(&mut self) -> Result<OplogEntry> {
        self.cursor
            .as_mut()
            .and_then(|c| c.batch.pop_front())
            .ok_or_else(|| Error::internal("next() called without a buffered record"))
    }

    fn tail_check(&mut self) -> Result<()> {
        let Some(peer) = self.connected.as_ref() else {
            self.cursor = None;
            return Ok(());
        };
        let mut inner = peer.inner.lock();
        if inner.tail_checks > 0 {
            inner.tail_checks -= 1;
        } else {
            self.cursor = None;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.connected = None;
        self.cursor = None;
    }
}

/// Factory handing out [`ScriptedReader`]s over the same peers
#[derive(Debug)]
pub struct ScriptedReaderFactory {
    peers: Vec<ScriptedPeer>,
    created: AtomicUsize,
}

impl ScriptedReaderFactory {
    /// Factory over `peers`
    pub fn new(peers: Vec<ScriptedPeer>) -> Self {
        Self {
            peers,
            created: AtomicUsize::new(0),
        }
    }

    /// Readers created so far
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl ReaderFactory for ScriptedReaderFactory {
    fn reader(&self) -> Box<dyn OplogReader> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Box::new(ScriptedReader::new(self.peers.clone()))
    }
}
