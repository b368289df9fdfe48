//! Process-wide table of in-flight jobs and their cancellation handles

use dirshift_types::{Cancellable, Error, JobId, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Cancellation handle shared between a running job and the registry
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    /// Create a fresh, uncancelled handle
    pub fn new() -> Self {
        Self::default()
    }

    /// Underlying token, for `select!`-style waiting
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Fail with [`Error::Cancelled`] if cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Cancellable for CancelHandle {
    fn cancel(&self) {
        self.token.cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug)]
struct Entry {
    handle: CancelHandle,
    cancellable: bool,
    cancelled: bool,
}

impl Entry {
    /// Signal the handle unless it was already signalled or ignores cancellation
    fn signal(&mut self) -> bool {
        if !self.cancellable || self.cancelled {
            return false;
        }
        self.cancelled = true;
        self.handle.cancel();
        true
    }
}

/// Registry mapping job identifiers to cancellation handles
///
/// At most one entry exists per identifier. Entries are added by
/// [`register`](Self::register) and stay until the returned [`Registration`] is
/// dropped, so a cancelled job keeps its identifier until it has stopped.
#[derive(Debug, Clone, Default)]
pub struct CancellationRegistry {
    entries: Arc<Mutex<HashMap<JobId, Entry>>>,
}

impl CancellationRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, Entry>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Register a job as in flight, failing if the identifier is already running
    pub fn register(&self, id: &JobId) -> Result<Registration> {
        self.insert(id, true)
    }

    /// Register an operation that holds the identifier but never observes cancellation
    ///
    /// [`cancel`](Self::cancel) reports `false` for such entries.
    pub fn register_uncancellable(&self, id: &JobId) -> Result<Registration> {
        self.insert(id, false)
    }

    fn insert(&self, id: &JobId, cancellable: bool) -> Result<Registration> {
        let mut entries = self.lock();
        if entries.contains_key(id) {
            warn!("Rejected second run of in-flight job {}", id);
            return Err(Error::AlreadyRunning { id: id.to_string() });
        }

        let handle = CancelHandle::new();
        entries.insert(
            id.clone(),
            Entry {
                handle: handle.clone(),
                cancellable,
                cancelled: false,
            },
        );
        debug!("Registered job {}", id);

        Ok(Registration {
            registry: self.clone(),
            id: id.clone(),
            handle,
        })
    }

    /// Signal cancellation of an in-flight job
    ///
    /// Returns `true` only for the first signal. Jobs that are not in flight, were
    /// already cancelled, or ignore cancellation report `false`.
    pub fn cancel(&self, id: &JobId) -> bool {
        let signalled = self.lock().get_mut(id).is_some_and(Entry::signal);
        if signalled {
            debug!("Cancelled job {}", id);
        }
        signalled
    }

    /// Cancel every in-flight job, returning how many were newly signalled
    pub fn cancel_all(&self) -> usize {
        let mut entries = self.lock();
        let mut signalled = 0;
        for (id, entry) in entries.iter_mut() {
            if entry.signal() {
                debug!("Cancelled job {}", id);
                signalled += 1;
            }
        }
        signalled
    }

    /// Identifiers of all in-flight jobs, including cancelled ones still stopping
    pub fn in_flight(&self) -> Vec<JobId> {
        let mut ids: Vec<_> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Check whether a job is in flight
    pub fn is_in_flight(&self, id: &JobId) -> bool {
        self.lock().contains_key(id)
    }

    fn release(&self, id: &JobId) {
        if self.lock().remove(id).is_some() {
            debug!("Released job {}", id);
        }
    }
}

/// Guard for one in-flight run; removes its registry entry on drop
#[derive(Debug)]
pub struct Registration {
    registry: CancellationRegistry,
    id: JobId,
    handle: CancelHandle,
}

impl Registration {
    /// Identifier this registration belongs to
    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// Cancellation handle of the run
    pub fn handle(&self) -> &CancelHandle {
        &self.handle
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.release(&self.id);
    }
}
