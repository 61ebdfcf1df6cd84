use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::app::error::AppError;

/// A tracked child process that knows how to tear itself down.
pub trait ManagedProcess {
    fn terminate(&mut self);
}

/// Allocates opaque handles for tracked processes. Monotonic, never reused.
#[derive(Default)]
pub struct HandleAllocator {
    next: AtomicU64,
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Shared arena for live child processes. Each supervisor keeps its own
/// keying scheme (numeric handle or device serial) but shutdown goes through
/// the one `kill_all` sweep.
pub struct ProcessRegistry<K, H> {
    inner: Mutex<HashMap<K, H>>,
}

impl<K: Eq + Hash, H: ManagedProcess> ProcessRegistry<K, H> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn guard(&self, trace_id: &str) -> Result<MutexGuard<'_, HashMap<K, H>>, AppError> {
        self.inner
            .lock()
            .map_err(|_| AppError::system("Process registry locked", trace_id))
    }

    pub fn insert(&self, key: K, handle: H, trace_id: &str) -> Result<Option<H>, AppError> {
        Ok(self.guard(trace_id)?.insert(key, handle))
    }

    pub fn remove(&self, key: &K, trace_id: &str) -> Result<Option<H>, AppError> {
        Ok(self.guard(trace_id)?.remove(key))
    }

    pub fn contains(&self, key: &K, trace_id: &str) -> Result<bool, AppError> {
        Ok(self.guard(trace_id)?.contains_key(key))
    }

    pub fn len(&self, trace_id: &str) -> Result<usize, AppError> {
        Ok(self.guard(trace_id)?.len())
    }

    pub fn is_empty(&self, trace_id: &str) -> Result<bool, AppError> {
        Ok(self.guard(trace_id)?.is_empty())
    }

    /// Run `f` against the tracked handle, if any.
    pub fn with_mut<R>(
        &self,
        key: &K,
        trace_id: &str,
        f: impl FnOnce(&mut H) -> R,
    ) -> Result<Option<R>, AppError> {
        Ok(self.guard(trace_id)?.get_mut(key).map(f))
    }

    /// Terminate and drop every tracked process. Used by the shutdown sweep;
    /// a poisoned lock is recovered rather than propagated since the app is
    /// exiting anyway.
    pub fn kill_all(&self) -> usize {
        let mut guard = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        let count = guard.len();
        for (_, mut handle) in guard.drain() {
            handle.terminate();
        }
        count
    }
}

impl<K: Eq + Hash, H: ManagedProcess> Default for ProcessRegistry<K, H> {
    fn default() -> Self {
        Self::new()
    }
}
