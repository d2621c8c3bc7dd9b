//! Runtime mode state machine (spec §4.8).
//!
//! Grounded on `original_source/core/automation/mode_manager.{hpp,cpp}`:
//! same four modes, same transition table, same "copy callbacks, drop the
//! lock, then invoke" discipline — rewritten against `std::sync::Mutex`
//! and `log` instead of raw mutex/`iostream`.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use log::{error, info, warn};
use serde::Deserialize;

/// Runtime operating mode (spec §3, §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum RuntimeMode {
    /// Automation stopped, manual calls allowed.
    Manual,
    /// Automation running, manual calls gated by the manual-gating policy.
    Auto,
    /// Automation stopped, control calls blocked. Safe default at startup.
    Idle,
    /// Automation stopped due to an error; manual calls allowed for recovery.
    Fault,
}

impl fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RuntimeMode::Manual => "MANUAL",
            RuntimeMode::Auto => "AUTO",
            RuntimeMode::Idle => "IDLE",
            RuntimeMode::Fault => "FAULT",
        };
        f.write_str(s)
    }
}

fn is_valid_transition(from: RuntimeMode, to: RuntimeMode) -> bool {
    if from == to {
        return true;
    }
    if to == RuntimeMode::Fault {
        return true;
    }
    if from == RuntimeMode::Fault {
        return to == RuntimeMode::Manual;
    }
    match from {
        RuntimeMode::Manual => matches!(to, RuntimeMode::Auto | RuntimeMode::Idle),
        RuntimeMode::Auto | RuntimeMode::Idle => to == RuntimeMode::Manual,
        RuntimeMode::Fault => unreachable!("handled above"),
    }
}

type ModeChangeCallback = dyn Fn(RuntimeMode, RuntimeMode) + Send + Sync;

/// Thread-safe runtime mode state machine. Enforces the transition table
/// of spec §4.8 and notifies registered listeners after a successful
/// transition, with the state lock released.
pub struct ModeManager {
    current: Mutex<RuntimeMode>,
    callbacks: Mutex<Vec<Arc<ModeChangeCallback>>>,
}

impl ModeManager {
    pub fn new(initial_mode: RuntimeMode) -> Self {
        info!("mode manager initialized in {initial_mode} mode");
        ModeManager {
            current: Mutex::new(initial_mode),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn current_mode(&self) -> RuntimeMode {
        *self.current.lock().expect("mode manager lock poisoned")
    }

    pub fn is_idle(&self) -> bool {
        self.current_mode() == RuntimeMode::Idle
    }

    /// Requests a transition. Setting the current mode is a no-op success
    /// with no callback invocation; an invalid transition leaves the mode
    /// unchanged and returns a human-readable reason (spec §4.8).
    pub fn set_mode(&self, new_mode: RuntimeMode) -> Result<(), String> {
        let previous = {
            let mut current = self.current.lock().expect("mode manager lock poisoned");
            if *current == new_mode {
                return Ok(());
            }
            if !is_valid_transition(*current, new_mode) {
                let msg = format!("Invalid mode transition: {current} -> {new_mode}");
                warn!("{msg}");
                return Err(msg);
            }
            let previous = *current;
            *current = new_mode;
            previous
        };

        info!("mode changed: {previous} -> {new_mode}");

        let snapshot: Vec<Arc<ModeChangeCallback>> = {
            let callbacks = self.callbacks.lock().expect("mode manager lock poisoned");
            callbacks.clone()
        };
        for callback in &snapshot {
            // One callback's panic must not prevent the rest from running
            // (spec §4.8: "callback exceptions are isolated").
            if panic::catch_unwind(AssertUnwindSafe(|| callback(previous, new_mode))).is_err() {
                error!("mode change callback panicked");
            }
        }
        Ok(())
    }

    /// Registers a callback invoked after every successful transition, in
    /// registration order, with the state lock released. One callback
    /// panicking must not prevent the rest from running; callers should
    /// catch their own panics with `std::panic::catch_unwind` if their
    /// callback body can panic.
    pub fn on_mode_change(&self, callback: impl Fn(RuntimeMode, RuntimeMode) + Send + Sync + 'static) {
        self.callbacks
            .lock()
            .expect("mode manager lock poisoned")
            .push(Arc::new(callback));
    }
}

impl Default for ModeManager {
    fn default() -> Self {
        ModeManager::new(RuntimeMode::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn same_mode_is_a_noop() {
        let mgr = ModeManager::new(RuntimeMode::Manual);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        mgr.on_mode_change(move |_, _| {
            calls2.fetch_add(1, Ordering::SeqCst);
        });
        assert!(mgr.set_mode(RuntimeMode::Manual).is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn fault_recovers_only_through_manual() {
        let mgr = ModeManager::new(RuntimeMode::Manual);
        assert!(mgr.set_mode(RuntimeMode::Fault).is_ok());
        let err = mgr.set_mode(RuntimeMode::Auto).unwrap_err();
        assert!(err.contains("Invalid mode transition"));
        assert_eq!(mgr.current_mode(), RuntimeMode::Fault);
        assert!(mgr.set_mode(RuntimeMode::Manual).is_ok());
        assert!(mgr.set_mode(RuntimeMode::Auto).is_ok());
    }

    #[test]
    fn callback_runs_after_transition_in_registration_order() {
        let mgr = ModeManager::new(RuntimeMode::Manual);
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        mgr.on_mode_change(move |_, _| o1.lock().unwrap().push(1));
        mgr.on_mode_change(move |_, _| o2.lock().unwrap().push(2));
        mgr.set_mode(RuntimeMode::Auto).unwrap();
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }
}
