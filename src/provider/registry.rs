//! Thread-safe directory of live provider sessions (spec §4.4).
//!
//! Readable under concurrent load via a reader/writer lock: many concurrent
//! consumers (state-cache polling, call routing, operational queries) can
//! look up sessions without blocking each other, while lifecycle
//! operations take the write side.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::model::ProviderId;
use crate::provider::session::ProviderSession;

#[derive(Default)]
pub struct ProviderRegistry {
    sessions: RwLock<HashMap<ProviderId, Arc<ProviderSession>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        ProviderRegistry::default()
    }

    pub fn add(&self, provider_id: ProviderId, session: Arc<ProviderSession>) {
        let mut guard = self.sessions.write().expect("provider registry lock poisoned");
        guard.insert(provider_id, session);
    }

    /// Replaces an existing session (e.g. after a supervisor-triggered
    /// restart), returning the previous one if any so the caller can shut
    /// it down outside the write lock.
    pub fn replace(&self, provider_id: ProviderId, session: Arc<ProviderSession>) -> Option<Arc<ProviderSession>> {
        let mut guard = self.sessions.write().expect("provider registry lock poisoned");
        guard.insert(provider_id, session)
    }

    pub fn remove(&self, provider_id: &str) -> Option<Arc<ProviderSession>> {
        let mut guard = self.sessions.write().expect("provider registry lock poisoned");
        guard.remove(provider_id)
    }

    pub fn clear(&self) {
        let mut guard = self.sessions.write().expect("provider registry lock poisoned");
        guard.clear();
    }

    /// A temporary share of the session. The registry may lose its own
    /// reference to this session while the caller still holds this share;
    /// the share remains valid for the caller's current operation
    /// (spec §4.4).
    pub fn get(&self, provider_id: &str) -> Option<Arc<ProviderSession>> {
        let guard = self.sessions.read().expect("provider registry lock poisoned");
        guard.get(provider_id).cloned()
    }

    /// A value snapshot, decoupling iteration from concurrent mutation
    /// (spec §4.4).
    pub fn get_all(&self) -> Vec<(ProviderId, Arc<ProviderSession>)> {
        let guard = self.sessions.read().expect("provider registry lock poisoned");
        guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub fn provider_ids(&self) -> Vec<ProviderId> {
        let guard = self.sessions.read().expect("provider registry lock poisoned");
        guard.keys().cloned().collect()
    }
}
