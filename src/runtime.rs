//! Services context: wires providers, registries, the state cache, and the
//! call router into one runtime, and runs provider discovery (spec §4.2,
//! §9 "Cross-cutting runtime access").
//!
//! Grounded on `original_source/core/runtime/runtime.{hpp,cpp}`: the same
//! staged initialization (spawn providers → discover devices → build state
//! cache → build call router) and the same shape of `run`/`stop`/`shutdown`.
//! HTTP, telemetry, and the behavior-tree engine are external collaborators
//! outside this crate's scope (spec §1) and have no counterpart here; a
//! caller that needs them holds a `Services` and wires them externally.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info, warn};

use crate::automation::{ModeManager, ParameterStore};
use crate::cache::StateCache;
use crate::config::{ManualGatingPolicy, ProviderConfig, RuntimeConfig, TimeoutTable};
use crate::control::CallRouter;
use crate::error::{CoreError, Result};
use crate::events::EventEmitter;
use crate::model::ProviderId;
use crate::provider::{ProviderLockTable, ProviderRegistry, ProviderSession, ProviderSupervisor};
use crate::registry::device::{DeviceCapabilitySet, DeviceRegistry, RegisteredDevice};
use crate::transport::proto::{RequestBody, ResponseBody, StatusCode};

const CLIENT_NAME: &str = "anolis-core";
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Runs the discovery protocol against a freshly spawned session: Hello,
/// an optional WaitReady, ListDevices, then DescribeDevice for each
/// listed device (spec §4.2 steps 2-4, §6 "ADPP").
fn discover_provider(
    provider_id: &ProviderId,
    session: &ProviderSession,
    hello_timeout: Duration,
    ready_timeout: Duration,
    call_timeout: Duration,
) -> Result<Vec<RegisteredDevice>> {
    let hello = session.hello(CLIENT_NAME, CLIENT_VERSION, hello_timeout)?;
    if hello.status.code != StatusCode::Ok {
        return Err(hello.status.to_core_error());
    }

    let ready = session.wait_ready(ready_timeout)?;
    if ready.status.code != StatusCode::Ok {
        return Err(ready.status.to_core_error());
    }

    let list_resp = session.exchange(RequestBody::ListDevices, call_timeout)?;
    if list_resp.status.code != StatusCode::Ok {
        return Err(list_resp.status.to_core_error());
    }
    let ResponseBody::ListDevices { devices } = list_resp.body else {
        return Err(CoreError::internal(format!(
            "provider '{provider_id}' returned an unexpected body for ListDevices"
        )));
    };

    info!("[Runtime] provider '{provider_id}': discovered {} devices", devices.len());

    let mut registered = Vec::with_capacity(devices.len());
    for summary in devices {
        let describe_resp = session.exchange(
            RequestBody::DescribeDevice { device_id: summary.device_id.clone() },
            call_timeout,
        )?;
        if describe_resp.status.code != StatusCode::Ok {
            return Err(describe_resp.status.to_core_error());
        }
        let ResponseBody::DescribeDevice { device_id, label, signals, functions } = describe_resp.body else {
            return Err(CoreError::internal(format!(
                "provider '{provider_id}' returned an unexpected body for DescribeDevice({})",
                summary.device_id
            )));
        };

        let mut capabilities = DeviceCapabilitySet::default();
        for signal in signals {
            capabilities.signals_by_id.insert(signal.signal_id.clone(), signal.into());
        }
        for function in functions {
            capabilities.functions_by_name.insert(function.name.clone(), function.into());
        }

        registered.push(RegisteredDevice {
            handle: crate::model::DeviceHandle::new(provider_id.clone(), device_id),
            label,
            capabilities,
        });
    }

    Ok(registered)
}

/// A plain record of the shared handles every automation entry point needs,
/// passed by value rather than reached for through global state (spec §9
/// "Cross-cutting runtime access").
#[derive(Clone)]
pub struct Services {
    pub device_registry: Arc<DeviceRegistry>,
    pub provider_registry: Arc<ProviderRegistry>,
    pub provider_locks: Arc<ProviderLockTable>,
    pub supervisor: Arc<ProviderSupervisor>,
    pub events: EventEmitter,
    pub state_cache: Arc<StateCache>,
    pub call_router: Arc<CallRouter>,
    pub mode_manager: Arc<ModeManager>,
    pub parameters: Arc<ParameterStore>,
}

/// Owns the polling thread and every provider session for one configured
/// runtime. `initialize` spawns providers and runs discovery; `run` blocks
/// the calling thread until `stop` is called from another thread or a
/// signal handler; `shutdown` tears providers down (spec §9).
pub struct Runtime {
    config: RuntimeConfig,
    services: Services,
    running: AtomicBool,
    poll_thread: Option<JoinHandle<()>>,
}

impl Runtime {
    /// Spawns every configured provider, runs discovery against it, and
    /// builds the state cache, mode manager, parameter store, and call
    /// router on top of the resulting device registry (spec §4.2, §4.9 /
    /// `ParameterDefConfig`, §9).
    pub fn initialize(config: RuntimeConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| CoreError::invalid_argument(format!("invalid runtime config: {e}")))?;

        let device_registry = Arc::new(DeviceRegistry::new());
        let provider_registry = Arc::new(ProviderRegistry::new());
        let provider_locks = Arc::new(ProviderLockTable::new());
        let supervisor = Arc::new(ProviderSupervisor::new());
        let events = EventEmitter::new(config.event_bus.default_queue_size, config.event_bus.max_subscribers);
        let timeouts = TimeoutTable::from_providers(&config.providers);

        for provider_config in &config.providers {
            info!("[Runtime] starting provider '{}': {}", provider_config.id, provider_config.command);
            supervisor.register(provider_config.id.clone(), provider_config.restart_policy.clone());

            let session = ProviderSession::spawn(
                provider_config.id.clone(),
                &provider_config.command,
                &provider_config.args,
            )?;

            let devices = discover_provider(
                &provider_config.id,
                &session,
                Duration::from_millis(provider_config.hello_timeout_ms),
                Duration::from_millis(provider_config.ready_timeout_ms),
                Duration::from_millis(provider_config.timeout_ms),
            )?;
            device_registry.register_provider_devices(&provider_config.id, devices);
            provider_registry.add(provider_config.id.clone(), Arc::new(session));

            info!("[Runtime] provider '{}' ready", provider_config.id);
        }

        let state_cache = Arc::new(StateCache::new(
            device_registry.clone(),
            provider_registry.clone(),
            provider_locks.clone(),
            events.clone(),
            timeouts.clone(),
            Duration::from_millis(config.poll_interval_ms),
        ));
        state_cache.initialize();

        let mode_manager = Arc::new(ModeManager::new(config.initial_mode));

        let parameters = Arc::new(ParameterStore::new());
        for param in &config.parameters {
            let allowed_strings = param.allowed_strings.as_ref().map(|set| set.iter().cloned().collect());
            if let Err(e) = parameters.define(
                param.name.clone(),
                param.value_type,
                param.default.clone(),
                param.min,
                param.max,
                allowed_strings,
            ) {
                return Err(CoreError::invalid_argument(format!(
                    "invalid parameter definition '{}': {e}",
                    param.name
                )));
            }
        }

        let call_router = Arc::new(CallRouter::new(
            device_registry.clone(),
            provider_registry.clone(),
            provider_locks.clone(),
            state_cache.clone(),
            timeouts,
            Some(mode_manager.clone()),
            config.manual_gating_policy,
        ));

        Ok(Runtime {
            config,
            services: Services {
                device_registry,
                provider_registry,
                provider_locks,
                supervisor,
                events,
                state_cache,
                call_router,
                mode_manager,
                parameters,
            },
            running: AtomicBool::new(false),
            poll_thread: None,
        })
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Spawns the state cache's polling loop on a dedicated thread and
    /// blocks the calling thread on a 1-second health-check tick until
    /// `stop` is called, mirroring the original's main loop (spec §9).
    pub fn run(&mut self) {
        self.running.store(true, Ordering::Release);
        let state_cache = self.services.state_cache.clone();
        self.poll_thread = Some(thread::spawn(move || state_cache.run()));

        info!("[Runtime] polling active");
        while self.running.load(Ordering::Acquire) {
            thread::sleep(Duration::from_secs(1));
            self.health_tick();
        }
        info!("[Runtime] stopping");
    }

    /// Triggers `run`'s loop to exit at its next tick.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// One health-check cycle: records a heartbeat for every available
    /// provider, notes a crash for every unavailable one, and attempts a
    /// respawn plus re-discovery once the supervisor's backoff allows it
    /// (spec §4.3 "Fairness").
    fn health_tick(&self) {
        for provider_config in &self.config.providers {
            let provider_id = &provider_config.id;
            match self.services.provider_registry.get(provider_id) {
                Some(session) if session.is_healthy() => {
                    self.services.supervisor.record_heartbeat(provider_id, session.start_time());
                    continue;
                }
                _ => {}
            }

            if self.services.supervisor.mark_crash_detected(provider_id) {
                warn!("[Runtime] provider '{provider_id}' unavailable");
                self.services.supervisor.record_crash(provider_id);
            }

            if self.services.supervisor.should_restart(provider_id) {
                self.attempt_restart(provider_config);
            }
        }
    }

    /// Tears down the old session (if any), spawns a fresh one, and reruns
    /// discovery. A failure at either step schedules the next backoff
    /// attempt via another `record_crash` rather than propagating an error
    /// — there is no caller to propagate it to from a background tick.
    fn attempt_restart(&self, provider_config: &ProviderConfig) {
        let provider_id = &provider_config.id;
        info!("[Runtime] restarting provider '{provider_id}'");
        if let Some(old) = self.services.provider_registry.remove(provider_id) {
            old.shutdown();
        }

        let session = match ProviderSession::spawn(provider_id.clone(), &provider_config.command, &provider_config.args) {
            Ok(s) => s,
            Err(e) => {
                error!("[Runtime] restart of '{provider_id}' failed to spawn: {e}");
                self.services.supervisor.record_crash(provider_id);
                return;
            }
        };

        let discovered = discover_provider(
            provider_id,
            &session,
            Duration::from_millis(provider_config.hello_timeout_ms),
            Duration::from_millis(provider_config.ready_timeout_ms),
            Duration::from_millis(provider_config.timeout_ms),
        );
        match discovered {
            Ok(devices) => {
                self.services.device_registry.register_provider_devices(provider_id, devices);
                self.services.provider_registry.add(provider_id.clone(), Arc::new(session));
                self.services.supervisor.clear_crash_detected(provider_id);
                self.services.supervisor.record_success(provider_id);
                info!("[Runtime] provider '{provider_id}' restarted");
            }
            Err(e) => {
                error!("[Runtime] restart discovery for '{provider_id}' failed: {e}");
                session.shutdown();
                self.services.supervisor.record_crash(provider_id);
            }
        }
    }

    /// Shuts down the state cache's polling loop and every provider
    /// session. Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.services.state_cache.shutdown();
        if let Some(handle) = self.poll_thread.take() {
            if handle.join().is_err() {
                error!("[Runtime] poll thread panicked during shutdown");
            }
        }
        for provider_id in self.services.provider_registry.provider_ids() {
            info!("[Runtime] stopping provider '{provider_id}'");
            if let Some(session) = self.services.provider_registry.remove(&provider_id) {
                session.shutdown();
            }
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EventBusConfig, ProviderConfig, RestartPolicyConfig};
    use crate::automation::RuntimeMode;

    fn empty_config() -> RuntimeConfig {
        RuntimeConfig {
            providers: vec![],
            poll_interval_ms: 1000,
            initial_mode: RuntimeMode::Idle,
            manual_gating_policy: ManualGatingPolicy::Block,
            event_bus: EventBusConfig::default(),
            parameters: vec![],
        }
    }

    #[test]
    fn initialize_with_no_providers_succeeds() {
        let runtime = Runtime::initialize(empty_config()).unwrap();
        assert!(runtime.services().device_registry.all().is_empty());
        assert_eq!(runtime.services().mode_manager.current_mode(), RuntimeMode::Idle);
    }

    #[test]
    fn initialize_rejects_invalid_poll_interval() {
        let mut config = empty_config();
        config.poll_interval_ms = 10;
        assert!(Runtime::initialize(config).is_err());
    }

    #[test]
    fn initialize_fails_fast_on_unspawnable_provider() {
        let mut config = empty_config();
        config.providers.push(ProviderConfig {
            id: "bad".into(),
            command: "/nonexistent-binary-xyz".into(),
            args: vec![],
            timeout_ms: 5000,
            hello_timeout_ms: 5000,
            ready_timeout_ms: 60000,
            restart_policy: RestartPolicyConfig {
                enabled: true,
                max_attempts: 1,
                backoff_ms: vec![100],
                timeout_ms: 1000,
                success_reset_ms: 0,
            },
        });
        assert!(Runtime::initialize(config).is_err());
    }

    #[test]
    fn shutdown_before_run_is_a_noop() {
        let mut runtime = Runtime::initialize(empty_config()).unwrap();
        runtime.shutdown();
        runtime.shutdown();
    }
}
