//! Call router: validation, per-provider serialization, mode gating, and
//! post-call re-poll (spec §4.10).
//!
//! Grounded on `original_source/core/control/call_router.{hpp,cpp}`: the
//! same step order (mode gate → validate → resolve session → per-provider
//! lock → exchange → reflect), generalized to the typed `Value`/error
//! taxonomy used throughout this crate instead of a protobuf `Status`.

use std::collections::HashMap;
use std::sync::Arc;

use log::warn;

use crate::automation::mode::{ModeManager, RuntimeMode};
use crate::cache::StateCache;
use crate::config::{ManualGatingPolicy, TimeoutTable};
use crate::error::CoreError;
use crate::model::{DeviceHandle, Value};
use crate::provider::{ProviderLockTable, ProviderRegistry};
use crate::registry::device::DeviceRegistry;
use crate::transport::proto::{RequestBody, ResponseBody, StatusCode};

/// A device function call: target, function name, and named arguments
/// (spec §4.10).
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub device_handle: String,
    pub function_name: String,
    pub args: HashMap<String, Value>,
}

/// The outcome of one `execute_call` (spec §4.10 step 7).
#[derive(Debug, Clone)]
pub struct CallResult {
    pub success: bool,
    pub error_message: String,
    pub results: HashMap<String, Value>,
}

impl CallResult {
    fn ok(results: HashMap<String, Value>) -> Self {
        CallResult {
            success: true,
            error_message: String::new(),
            results,
        }
    }
}

/// Unified control path: the only way external callers execute device
/// functions (spec §4.10).
pub struct CallRouter {
    device_registry: Arc<DeviceRegistry>,
    provider_registry: Arc<ProviderRegistry>,
    provider_locks: Arc<ProviderLockTable>,
    state_cache: Arc<StateCache>,
    timeouts: TimeoutTable,
    mode_manager: Option<Arc<ModeManager>>,
    manual_gating_policy: ManualGatingPolicy,
}

impl CallRouter {
    pub fn new(
        device_registry: Arc<DeviceRegistry>,
        provider_registry: Arc<ProviderRegistry>,
        provider_locks: Arc<ProviderLockTable>,
        state_cache: Arc<StateCache>,
        timeouts: TimeoutTable,
        mode_manager: Option<Arc<ModeManager>>,
        manual_gating_policy: ManualGatingPolicy,
    ) -> Self {
        CallRouter {
            device_registry,
            provider_registry,
            provider_locks,
            state_cache,
            timeouts,
            mode_manager,
            manual_gating_policy,
        }
    }

    /// Executes a call end to end: mode gate, validation, provider
    /// resolution, serialized exchange, and a post-call re-poll (spec
    /// §4.10 steps 1-7).
    pub fn execute_call(&self, request: CallRequest) -> CallResult {
        if let Err(e) = self.check_mode_gate() {
            return CallResult {
                success: false,
                error_message: e.message,
                results: HashMap::new(),
            };
        }

        let (handle, function_id) = match self.validate(&request) {
            Ok(v) => v,
            Err(e) => {
                warn!("call validation failed: {e}");
                return CallResult {
                    success: false,
                    error_message: e.message,
                    results: HashMap::new(),
                };
            }
        };

        let session = match self.provider_registry.get(&handle.provider_id) {
            None => {
                let msg = format!("provider not found: {}", handle.provider_id);
                return CallResult {
                    success: false,
                    error_message: msg,
                    results: HashMap::new(),
                };
            }
            Some(session) if !session.is_healthy() => {
                let msg = format!("provider not available: {}", handle.provider_id);
                return CallResult {
                    success: false,
                    error_message: msg,
                    results: HashMap::new(),
                };
            }
            Some(session) => session,
        };

        // Per-provider serialization: the same lock object the state cache
        // takes for each device belonging to this provider (spec §4.10
        // closing paragraph, §9 "Per-provider locks").
        let lock_guard = self.provider_locks.acquire(&handle.provider_id);
        let held = lock_guard.held();
        let timeout = self.timeouts.get(&handle.provider_id);
        let exchange_result = session.exchange(
            RequestBody::Call {
                device_id: handle.device_id.clone(),
                function_id,
                function_name: request.function_name.clone(),
                args: request.args,
            },
            timeout,
        );
        drop(held);

        let results = match exchange_result {
            Ok(resp) if resp.status.code == StatusCode::Ok => match resp.body {
                ResponseBody::Call { results } => results,
                _ => HashMap::new(),
            },
            Ok(resp) => {
                let err = resp.status.to_core_error();
                warn!("call to '{}' failed: {err}", handle);
                return CallResult {
                    success: false,
                    error_message: err.message,
                    results: HashMap::new(),
                };
            }
            Err(e) => {
                warn!("call to '{}' failed: {e}", handle);
                return CallResult {
                    success: false,
                    error_message: e.message,
                    results: HashMap::new(),
                };
            }
        };

        // Reflect: an immediate re-poll so observers see the post-call
        // state before the next periodic tick (spec §4.10 step 6).
        if let Err(e) = self.state_cache.poll_device_now(&handle) {
            warn!("post-call re-poll of '{handle}' failed: {e}");
        }

        CallResult::ok(results)
    }

    /// Validation only, no execution (spec §4.10's `validate_call`
    /// counterpart).
    pub fn validate_call(&self, request: &CallRequest) -> Result<(), CoreError> {
        self.validate(request).map(|_| ())
    }

    fn check_mode_gate(&self) -> Result<(), CoreError> {
        let Some(mode_manager) = &self.mode_manager else {
            return Ok(());
        };
        if mode_manager.current_mode() != RuntimeMode::Auto {
            return Ok(());
        }
        match self.manual_gating_policy {
            ManualGatingPolicy::Block => {
                let msg = "manual call blocked in AUTO mode".to_string();
                warn!("{msg}");
                Err(CoreError::failed_precondition(msg))
            }
            ManualGatingPolicy::Override => Ok(()),
        }
    }

    fn validate(&self, request: &CallRequest) -> Result<(DeviceHandle, u32), CoreError> {
        let handle = DeviceHandle::parse(&request.device_handle)?;
        let device = self.device_registry.get_by_handle_parsed(&handle)?;
        let function = device
            .capabilities
            .functions_by_name
            .get(&request.function_name)
            .ok_or_else(|| {
                CoreError::not_found(format!(
                    "function not found: {} on device {handle}",
                    request.function_name
                ))
            })?;

        if request.args.len() != function.args.len() {
            return Err(CoreError::invalid_argument(format!(
                "argument count mismatch: expected {}, got {}",
                function.args.len(),
                request.args.len()
            )));
        }
        for arg in &function.args {
            if !request.args.contains_key(&arg.name) {
                return Err(CoreError::invalid_argument(format!("missing required argument: {}", arg.name)));
            }
        }

        Ok((handle, function.function_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventEmitter;
    use crate::registry::device::{DeviceCapabilitySet, FunctionSpec, RegisteredDevice};
    use indexmap::IndexMap;
    use std::time::Duration;

    fn router_with_reset_function() -> CallRouter {
        let device_registry = Arc::new(DeviceRegistry::new());
        let mut functions = IndexMap::new();
        functions.insert(
            "reset".to_string(),
            FunctionSpec {
                function_id: 1,
                name: "reset".into(),
                description: String::new(),
                args: vec![],
            },
        );
        device_registry.register_provider_devices(
            &"sim0".to_string(),
            vec![RegisteredDevice {
                handle: DeviceHandle::new("sim0", "dev1"),
                label: "Device".into(),
                capabilities: DeviceCapabilitySet {
                    signals_by_id: IndexMap::new(),
                    functions_by_name: functions,
                },
            }],
        );
        let provider_registry = Arc::new(ProviderRegistry::new());
        let provider_locks = Arc::new(ProviderLockTable::new());
        let state_cache = Arc::new(StateCache::new(
            device_registry.clone(),
            provider_registry.clone(),
            provider_locks.clone(),
            EventEmitter::new(10, 0),
            TimeoutTable::default(),
            Duration::from_millis(100),
        ));
        CallRouter::new(
            device_registry,
            provider_registry,
            provider_locks,
            state_cache,
            TimeoutTable::default(),
            None,
            ManualGatingPolicy::Block,
        )
    }

    #[test]
    fn unknown_function_is_not_found() {
        let router = router_with_reset_function();
        let err = router
            .validate_call(&CallRequest {
                device_handle: "sim0/dev1".into(),
                function_name: "explode".into(),
                args: HashMap::new(),
            })
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotFound);
        assert!(err.message.contains("function"));
    }

    #[test]
    fn mode_gate_blocks_in_auto_with_block_policy() {
        let mut router = router_with_reset_function();
        let mode_manager = Arc::new(ModeManager::new(RuntimeMode::Manual));
        mode_manager.set_mode(RuntimeMode::Auto).unwrap();
        router.mode_manager = Some(mode_manager);
        let result = router.execute_call(CallRequest {
            device_handle: "sim0/dev1".into(),
            function_name: "reset".into(),
            args: HashMap::new(),
        });
        assert!(!result.success);
        assert!(result.error_message.contains("blocked in AUTO"));
    }

    #[test]
    fn missing_provider_is_reported_without_panicking() {
        let router = router_with_reset_function();
        let result = router.execute_call(CallRequest {
            device_handle: "sim0/dev1".into(),
            function_name: "reset".into(),
            args: HashMap::new(),
        });
        assert!(!result.success);
        assert!(result.error_message.contains("not found") || result.error_message.contains("not available"));
    }
}
