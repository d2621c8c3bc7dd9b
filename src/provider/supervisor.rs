//! Per-provider restart policy and observed supervision state (spec §4.3).
//!
//! Mirrors `original_source/core/provider/provider_supervisor.{hpp,cpp}`:
//! attempt counting against a fixed backoff schedule, a circuit breaker
//! that opens after `max_attempts`, and a success-reset window that closes
//! the breaker again after a sustained heartbeat.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::config::RestartPolicyConfig;
use crate::model::ProviderId;

/// Derived lifecycle label for operational reporting (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Running,
    Recovering,
    Restarting,
    CircuitOpen,
    Down,
}

#[derive(Debug, Clone)]
struct RestartState {
    attempt_count: u32,
    circuit_open: bool,
    crash_detected: bool,
    next_restart_time: Option<Instant>,
    last_heartbeat: Option<Instant>,
    process_start: Option<Instant>,
}

impl Default for RestartState {
    fn default() -> Self {
        RestartState {
            attempt_count: 0,
            circuit_open: false,
            crash_detected: false,
            next_restart_time: None,
            last_heartbeat: None,
            process_start: None,
        }
    }
}

/// A point-in-time view suitable for operational reporting (spec §4.3
/// "Snapshot").
#[derive(Debug, Clone)]
pub struct SupervisionSnapshot {
    pub attempt_count: u32,
    pub circuit_open: bool,
    pub ms_since_last_heartbeat: Option<u64>,
    pub ms_until_next_restart: Option<u64>,
    pub lifecycle: Lifecycle,
}

struct ProviderEntry {
    policy: RestartPolicyConfig,
    state: RestartState,
}

/// Maintains per-provider restart policy and observed state. Lifecycle is
/// strictly read-only externally; writes occur only via `register`,
/// `record_heartbeat`, `record_crash`, `record_success` (spec §4.3).
#[derive(Default)]
pub struct ProviderSupervisor {
    providers: RwLock<HashMap<ProviderId, ProviderEntry>>,
}

impl ProviderSupervisor {
    pub fn new() -> Self {
        ProviderSupervisor::default()
    }

    pub fn register(&self, provider_id: ProviderId, policy: RestartPolicyConfig) {
        if policy.enabled {
            info!(
                "[Supervisor] registered provider '{provider_id}' with restart policy (max_attempts={})",
                policy.max_attempts
            );
        } else {
            debug!("[Supervisor] registered provider '{provider_id}' without restart policy");
        }
        let mut guard = self.providers.write().expect("supervisor lock poisoned");
        guard.insert(
            provider_id,
            ProviderEntry {
                policy,
                state: RestartState::default(),
            },
        );
    }

    /// True only when the policy is enabled, the circuit is closed, and
    /// `now >= next_restart_time` (spec §4.3 "Fairness").
    pub fn should_restart(&self, provider_id: &str) -> bool {
        let guard = self.providers.read().expect("supervisor lock poisoned");
        let Some(entry) = guard.get(provider_id) else {
            return false;
        };
        if !entry.policy.enabled || entry.state.circuit_open {
            return false;
        }
        match entry.state.next_restart_time {
            Some(t) => Instant::now() >= t,
            None => true,
        }
    }

    /// Milliseconds until the next restart is eligible, or 0 if it already
    /// is.
    pub fn ms_until_next_restart(&self, provider_id: &str) -> Option<u64> {
        let guard = self.providers.read().expect("supervisor lock poisoned");
        let entry = guard.get(provider_id)?;
        let t = entry.state.next_restart_time?;
        Some(t.saturating_duration_since(Instant::now()).as_millis() as u64)
    }

    /// A crash has just been observed for the first time, before a restart
    /// has been recorded. Returns true if this call newly marks the crash
    /// (idempotent otherwise).
    pub fn mark_crash_detected(&self, provider_id: &str) -> bool {
        let mut guard = self.providers.write().expect("supervisor lock poisoned");
        let Some(entry) = guard.get_mut(provider_id) else {
            return false;
        };
        if entry.state.crash_detected {
            return false;
        }
        entry.state.crash_detected = true;
        true
    }

    pub fn clear_crash_detected(&self, provider_id: &str) {
        let mut guard = self.providers.write().expect("supervisor lock poisoned");
        if let Some(entry) = guard.get_mut(provider_id) {
            entry.state.crash_detected = false;
        }
    }

    /// Records an observed crash: increments the attempt counter and
    /// schedules the next restart, or opens the circuit if the policy is
    /// disabled or attempts are exhausted. Returns `true` if a restart was
    /// scheduled.
    pub fn record_crash(&self, provider_id: &str) -> bool {
        let mut guard = self.providers.write().expect("supervisor lock poisoned");
        let Some(entry) = guard.get_mut(provider_id) else {
            return false;
        };

        if !entry.policy.enabled {
            entry.state.circuit_open = true;
            error!("[Supervisor] provider '{provider_id}' crashed (restart policy disabled)");
            return false;
        }

        entry.state.attempt_count += 1;
        if entry.state.attempt_count > entry.policy.max_attempts {
            entry.state.circuit_open = true;
            error!(
                "[Supervisor] provider '{provider_id}' crashed (circuit open, exceeded {} attempts)",
                entry.policy.max_attempts
            );
            return false;
        }

        let attempt_index = (entry.state.attempt_count - 1) as usize;
        let backoff_ms = entry.policy.backoff_ms[attempt_index];
        entry.state.next_restart_time = Some(Instant::now() + Duration::from_millis(backoff_ms));
        warn!(
            "[Supervisor] provider '{provider_id}' crashed (attempt {}/{}, retry in {backoff_ms}ms)",
            entry.state.attempt_count, entry.policy.max_attempts
        );
        true
    }

    /// Records a heartbeat. If a crash had been recorded and the process
    /// has been alive for at least the success reset window, resets the
    /// attempt counter and closes the circuit (spec §4.3 "On observed
    /// recovery").
    pub fn record_heartbeat(&self, provider_id: &str, process_start: Instant) {
        let mut guard = self.providers.write().expect("supervisor lock poisoned");
        let Some(entry) = guard.get_mut(provider_id) else {
            return;
        };
        let now = Instant::now();
        entry.state.last_heartbeat = Some(now);
        if entry.state.process_start != Some(process_start) {
            entry.state.process_start = Some(process_start);
        }

        if entry.state.attempt_count > 0 {
            let alive_for = now.saturating_duration_since(process_start);
            if alive_for >= Duration::from_millis(entry.policy.success_reset_ms) {
                info!("[Supervisor] provider '{provider_id}' recovered after {} attempts", entry.state.attempt_count);
                entry.state.attempt_count = 0;
                entry.state.circuit_open = false;
                entry.state.crash_detected = false;
                entry.state.next_restart_time = None;
            }
        }
    }

    /// Explicit success report (e.g. after a successful restart begins):
    /// resets the attempt counter and circuit unconditionally.
    pub fn record_success(&self, provider_id: &str) {
        let mut guard = self.providers.write().expect("supervisor lock poisoned");
        if let Some(entry) = guard.get_mut(provider_id) {
            if entry.state.attempt_count > 0 {
                info!(
                    "[Supervisor] provider '{provider_id}' recovered successfully (after {} attempts)",
                    entry.state.attempt_count
                );
            }
            entry.state.attempt_count = 0;
            entry.state.circuit_open = false;
            entry.state.crash_detected = false;
            entry.state.next_restart_time = None;
        }
    }

    pub fn is_circuit_open(&self, provider_id: &str) -> bool {
        let guard = self.providers.read().expect("supervisor lock poisoned");
        guard.get(provider_id).map(|e| e.state.circuit_open).unwrap_or(false)
    }

    pub fn attempt_count(&self, provider_id: &str) -> u32 {
        let guard = self.providers.read().expect("supervisor lock poisoned");
        guard.get(provider_id).map(|e| e.state.attempt_count).unwrap_or(0)
    }

    pub fn snapshot(&self, provider_id: &str, available: bool) -> Option<SupervisionSnapshot> {
        let guard = self.providers.read().expect("supervisor lock poisoned");
        let entry = guard.get(provider_id)?;
        let now = Instant::now();
        let ms_since_last_heartbeat = entry
            .state
            .last_heartbeat
            .map(|t| now.saturating_duration_since(t).as_millis() as u64);
        let ms_until_next_restart = entry
            .state
            .next_restart_time
            .map(|t| t.saturating_duration_since(now).as_millis() as u64);

        let lifecycle = if available {
            if entry.state.attempt_count == 0 {
                Lifecycle::Running
            } else {
                Lifecycle::Recovering
            }
        } else if entry.state.circuit_open {
            Lifecycle::CircuitOpen
        } else if entry.state.crash_detected || entry.state.next_restart_time.is_some() {
            Lifecycle::Restarting
        } else {
            Lifecycle::Down
        };

        Some(SupervisionSnapshot {
            attempt_count: entry.state.attempt_count,
            circuit_open: entry.state.circuit_open,
            ms_since_last_heartbeat,
            ms_until_next_restart,
            lifecycle,
        })
    }
}
