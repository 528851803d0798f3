//! One-per-node owner of the background producer.
//!
//! The node's startup sequence owns a [`SyncEngine`]. The first caller of
//! [`SyncEngine::get_or_init`] builds the [`BackgroundSync`]; concurrent
//! callers block until it exists and all get the same instance. Once
//! [`SyncEngine::shutdown`] has been called no caller gets an instance.

use crate::clock::ShutdownSignal;
use crate::producer::BackgroundSync;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

/// Holder of the node's single background producer
#[derive(Debug, Default)]
pub struct SyncEngine {
    sync: OnceLock<Arc<BackgroundSync>>,
    shutdown: ShutdownSignal,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Create an empty engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the producer, building it with `init` on first use.
    /// `init` receives the engine's shutdown signal and runs at most once.
    pub fn get_or_init<F>(&self, init: F) -> Option<Arc<BackgroundSync>>
    where
        F: FnOnce(ShutdownSignal) -> BackgroundSync,
    {
        if self.shutdown.is_triggered() {
            return None;
        }
        let sync = self
            .sync
            .get_or_init(|| Arc::new(init(self.shutdown.clone())));
        Some(sync.clone())
    }

    /// The producer, if built and not shut down
    pub fn get(&self) -> Option<Arc<BackgroundSync>> {
        if self.shutdown.is_triggered() {
            return None;
        }
        self.sync.get().cloned()
    }

    /// Spawn the producer thread. Calling it again while the thread exists
    /// is a no-op.
    pub fn start(&self) -> Result<()> {
        let sync = self
            .get()
            .ok_or_else(|| Error::internal("sync engine is not initialized or is shut down"))?;
        let mut thread = self.thread.lock();
        if thread.is_some() {
            return Ok(());
        }
        sync.config().validate()?;

        let name = sync.config().thread_name.clone();
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || sync.run())?;
        tracing::info!("Spawned producer thread {}", name);
        *thread = Some(handle);
        Ok(())
    }

    /// Whether the producer thread has been spawned
    pub fn is_running(&self) -> bool {
        self.thread
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Signal cooperative shutdown; the thread exits at its next check
    pub fn shutdown(&self) {
        tracing::info!("Shutting down background sync");
        self.shutdown.trigger();
    }

    /// Wait for the producer thread to exit
    pub fn join(&self) -> Result<()> {
        let handle = self.thread.lock().take();
        match handle {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::internal("producer thread panicked")),
            None => Ok(()),
        }
    }
}
