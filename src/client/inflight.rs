//! In-flight request registry.
//!
//! Maps a [`Fingerprint`] to the single unit of work currently producing
//! its result. Callers that arrive while the work runs clone its shared
//! future instead of starting another upstream call.
//!
//! Every entry carries a generation number. Removal is conditional on it,
//! so a unit of work that finishes late can never unregister a newer unit
//! registered under the same fingerprint.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::task::{AbortHandle, JoinHandle};

use crate::fingerprint::Fingerprint;
use crate::{MuninnError, Result};

/// Terminal outcome of one unit of work, cloned out to every awaiter.
pub(crate) type Outcome = Result<String>;

/// A unit of work that any number of callers can await.
pub(crate) type SharedWork = Shared<BoxFuture<'static, Outcome>>;

struct Entry {
    generation: u64,
    work: SharedWork,
    abort: AbortHandle,
}

/// Result of [`InFlightRegistry::join_or_register`].
pub(crate) enum Slot {
    /// Another caller's work was already running.
    Joined { generation: u64, work: SharedWork },
    /// This caller registered new work.
    Registered { work: SharedWork },
}

#[derive(Default)]
pub(crate) struct InFlightRegistry {
    entries: Mutex<HashMap<Fingerprint, Entry>>,
    next_generation: AtomicU64,
}

impl InFlightRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    // Critical sections never await, so a poisoned map is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<Fingerprint, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join the work registered for `fingerprint`, or register new work.
    ///
    /// `spawn` runs under the registry lock, receives the new entry's
    /// generation, and must only start the task. The check and the insert
    /// happen atomically, so at most one entry exists per fingerprint.
    pub(crate) fn join_or_register<F>(&self, fingerprint: Fingerprint, spawn: F) -> Slot
    where
        F: FnOnce(u64) -> JoinHandle<Outcome>,
    {
        let mut entries = self.lock();
        if let Some(entry) = entries.get(&fingerprint) {
            return Slot::Joined {
                generation: entry.generation,
                work: entry.work.clone(),
            };
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let handle = spawn(generation);
        let abort = handle.abort_handle();
        let work = share(handle);
        entries.insert(
            fingerprint,
            Entry {
                generation,
                work: work.clone(),
                abort,
            },
        );
        Slot::Registered { work }
    }

    /// Remove the entry for `fingerprint` if it still has `generation`.
    pub(crate) fn remove(&self, fingerprint: &Fingerprint, generation: u64) -> bool {
        let mut entries = self.lock();
        match entries.get(fingerprint) {
            Some(entry) if entry.generation == generation => {
                entries.remove(fingerprint);
                true
            }
            _ => false,
        }
    }

    /// Abort every registered unit of work and empty the registry.
    ///
    /// Returns how many entries were removed. Awaiters of aborted work
    /// observe [`MuninnError::Cancelled`].
    pub(crate) fn abort_all(&self) -> usize {
        let drained: Vec<Entry> = self.lock().drain().map(|(_, entry)| entry).collect();
        for entry in &drained {
            entry.abort.abort();
        }
        drained.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Turn a task handle into a cloneable future over its outcome.
fn share(handle: JoinHandle<Outcome>) -> SharedWork {
    async move {
        match handle.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => Err(MuninnError::Cancelled),
            Err(e) => Err(MuninnError::Internal(format!("completion task failed: {e}"))),
        }
    }
    .boxed()
    .shared()
}

/// Unregisters a unit of work when dropped.
///
/// Held by the task itself, so the entry goes away when the work completes,
/// fails, panics, or is aborted, whichever comes first.
pub(crate) struct Registration {
    registry: Arc<InFlightRegistry>,
    fingerprint: Fingerprint,
    generation: u64,
}

impl Registration {
    pub(crate) fn new(registry: Arc<InFlightRegistry>, fingerprint: Fingerprint, generation: u64) -> Self {
        Self {
            registry,
            fingerprint,
            generation,
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(&self.fingerprint, self.generation);
    }
}
