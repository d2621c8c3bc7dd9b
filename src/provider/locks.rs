//! Per-provider call lock table (spec §4.10, §9).
//!
//! One `Mutex<()>` per provider id, created lazily on first use and kept
//! for the lifetime of the runtime. This is the single object the state
//! cache's polling loop and the call router both acquire before touching a
//! provider's session, guaranteeing a poll and a call on the same provider
//! are mutually exclusive while calls on distinct providers may run
//! concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::model::ProviderId;

#[derive(Default)]
pub struct ProviderLockTable {
    locks: RwLock<HashMap<ProviderId, Arc<Mutex<()>>>>,
}

impl ProviderLockTable {
    pub fn new() -> Self {
        ProviderLockTable::default()
    }

    fn lock_for(&self, provider_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().expect("lock table poisoned").get(provider_id) {
            return lock.clone();
        }
        let mut guard = self.locks.write().expect("lock table poisoned");
        guard
            .entry(provider_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquires the provider's exclusive call lock, blocking until it is
    /// available. The returned guard must be held across the exchange it
    /// protects.
    pub fn acquire(&self, provider_id: &str) -> ProviderLockGuard {
        let lock = self.lock_for(provider_id);
        ProviderLockGuard { lock }
    }
}

/// An owned guard over one provider's call lock. Kept as a small owning
/// wrapper (rather than returning a borrowed `MutexGuard` tied to the
/// table) so callers can hold it across calls into other components
/// without entangling lifetimes with the lock table itself.
pub struct ProviderLockGuard {
    lock: Arc<Mutex<()>>,
}

impl ProviderLockGuard {
    pub fn held(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().expect("provider call lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn same_provider_serializes_distinct_providers_do_not() {
        let table = Arc::new(ProviderLockTable::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];
        for _ in 0..4 {
            let table = table.clone();
            let counter = counter.clone();
            handles.push(thread::spawn(move || {
                let g = table.acquire("p1");
                let _held = g.held();
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }
}
