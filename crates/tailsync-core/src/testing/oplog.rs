//! In-memory local oplog

use crate::gtid::Gtid;
use crate::oplog::{LocalOplog, OplogEntry};
use crate::{Error, Result};
use parking_lot::Mutex;

#[derive(Debug)]
struct MemOplogInner {
    applied: Gtid,
    appended: Vec<OplogEntry>,
    apply_on_append: bool,
    fail_appends: bool,
    fail_reads: bool,
}

/// Local oplog that applies appended entries immediately unless told not to
#[derive(Debug)]
pub struct MemOplog {
    inner: Mutex<MemOplogInner>,
}

impl MemOplog {
    /// Oplog whose newest applied entry is `applied`
    pub fn at(applied: Gtid) -> Self {
        Self {
            inner: Mutex::new(MemOplogInner {
                applied,
                appended: Vec::new(),
                apply_on_append: true,
                fail_appends: false,
                fail_reads: false,
            }),
        }
    }

    /// Move the applied position
    pub fn set_applied(&self, gtid: Gtid) {
        self.inner.lock().applied = gtid;
    }

    /// Whether `append` also advances the applied position
    pub fn set_apply_on_append(&self, apply: bool) {
        self.inner.lock().apply_on_append = apply;
    }

    /// Make `append` fail with a store error
    pub fn fail_appends(&self, fail: bool) {
        self.inner.lock().fail_appends = fail;
    }

    /// Make `applied_gtid` fail with a store error
    pub fn fail_reads(&self, fail: bool) {
        self.inner.lock().fail_reads = fail;
    }

    /// Everything appended so far
    pub fn appended(&self) -> Vec<OplogEntry> {
        self.inner.lock().appended.clone()
    }
}

impl LocalOplog for MemOplog {
    fn applied_gtid(&self) -> Result<Gtid> {
        let inner = self.inner.lock();
        if inner.fail_reads {
            return Err(Error::store("oplog unavailable"));
        }
        Ok(inner.applied)
    }

    fn append(&self, entry: OplogEntry) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_appends {
            return Err(Error::store("disk full"));
        }
        if inner.apply_on_append {
            inner.applied = inner.applied.max(entry.gtid);
        }
        inner.appended.push(entry);
        Ok(())
    }
}
