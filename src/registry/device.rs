//! Device registry: the immutable post-discovery catalog of devices,
//! signals, and functions per provider (spec §3, §4.5).

use std::collections::HashMap;
use std::sync::RwLock;

use indexmap::IndexMap;

use crate::error::CoreError;
use crate::model::{DeviceHandle, ProviderId, ValueType};
use crate::transport::proto::{WireFunctionSpec, WireSignalSpec};

/// Per-signal declaration: id, label, value type, and whether the state
/// cache polls it by default.
#[derive(Debug, Clone)]
pub struct SignalSpec {
    pub signal_id: String,
    pub label: String,
    pub value_type: ValueType,
    pub poll_hint_hz: f64,
    pub is_default: bool,
}

impl From<WireSignalSpec> for SignalSpec {
    fn from(w: WireSignalSpec) -> Self {
        SignalSpec {
            signal_id: w.signal_id,
            label: w.label,
            value_type: w.value_type,
            poll_hint_hz: w.poll_hint_hz,
            is_default: w.is_default,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArgSpec {
    pub name: String,
    pub value_type: ValueType,
    pub required: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Per-function declaration: numeric id, name, and its ordered argument
/// list.
#[derive(Debug, Clone)]
pub struct FunctionSpec {
    pub function_id: u32,
    pub name: String,
    pub description: String,
    pub args: Vec<ArgSpec>,
}

impl From<WireFunctionSpec> for FunctionSpec {
    fn from(w: WireFunctionSpec) -> Self {
        FunctionSpec {
            function_id: w.function_id,
            name: w.name,
            description: w.description,
            args: w
                .args
                .into_iter()
                .map(|a| ArgSpec {
                    name: a.name,
                    value_type: a.value_type,
                    required: a.required,
                    min: a.min,
                    max: a.max,
                })
                .collect(),
        }
    }
}

/// Immutable-after-discovery capability set for one device: signal specs
/// keyed by signal id, function specs keyed by function name.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilitySet {
    pub signals_by_id: IndexMap<String, SignalSpec>,
    pub functions_by_name: IndexMap<String, FunctionSpec>,
}

impl DeviceCapabilitySet {
    pub fn default_signal_ids(&self) -> Vec<String> {
        self.signals_by_id
            .values()
            .filter(|s| s.is_default)
            .map(|s| s.signal_id.clone())
            .collect()
    }
}

/// An immutable record: device handle plus its capability set.
#[derive(Debug, Clone)]
pub struct RegisteredDevice {
    pub handle: DeviceHandle,
    pub label: String,
    pub capabilities: DeviceCapabilitySet,
}

impl RegisteredDevice {
    pub fn canonical_handle(&self) -> String {
        self.handle.to_string()
    }
}

/// Thread-safe, post-discovery-immutable catalog of devices. Populated
/// exactly once per provider (`discover_provider`) and never mutated
/// thereafter for that provider; entries are only removed as part of
/// provider teardown (spec §3 invariant).
#[derive(Default)]
pub struct DeviceRegistry {
    inner: RwLock<HashMap<String, RegisteredDevice>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        DeviceRegistry::default()
    }

    /// Registers the devices discovered for one provider. Replaces any
    /// prior entries for that provider (used on provider restart following
    /// teardown — the invariant is "no mutation without teardown", not "no
    /// restart ever").
    pub fn register_provider_devices(&self, provider_id: &ProviderId, devices: Vec<RegisteredDevice>) {
        let mut guard = self.inner.write().expect("device registry lock poisoned");
        guard.retain(|_, d| &d.handle.provider_id != provider_id);
        for device in devices {
            guard.insert(device.canonical_handle(), device);
        }
    }

    /// Removes all devices belonging to a provider (provider teardown).
    pub fn remove_provider(&self, provider_id: &ProviderId) {
        let mut guard = self.inner.write().expect("device registry lock poisoned");
        guard.retain(|_, d| &d.handle.provider_id != provider_id);
    }

    pub fn get(&self, provider_id: &str, device_id: &str) -> Option<RegisteredDevice> {
        let guard = self.inner.read().expect("device registry lock poisoned");
        guard.get(&format!("{provider_id}/{device_id}")).cloned()
    }

    pub fn get_by_handle(&self, handle_str: &str) -> Option<RegisteredDevice> {
        let guard = self.inner.read().expect("device registry lock poisoned");
        guard.get(handle_str).cloned()
    }

    pub fn get_by_handle_parsed(&self, handle: &DeviceHandle) -> Result<RegisteredDevice, CoreError> {
        self.get_by_handle(&handle.to_string())
            .ok_or_else(|| CoreError::not_found(format!("device not found: {handle}")))
    }

    /// All devices belonging to one provider, for building the state
    /// cache's poll plan.
    pub fn devices_for_provider(&self, provider_id: &str) -> Vec<RegisteredDevice> {
        let guard = self.inner.read().expect("device registry lock poisoned");
        guard
            .values()
            .filter(|d| d.handle.provider_id == provider_id)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<RegisteredDevice> {
        let guard = self.inner.read().expect("device registry lock poisoned");
        guard.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_device(provider: &str, device: &str) -> RegisteredDevice {
        let mut signals = IndexMap::new();
        signals.insert(
            "temp".to_string(),
            SignalSpec {
                signal_id: "temp".into(),
                label: "Temperature".into(),
                value_type: ValueType::Double,
                poll_hint_hz: 1.0,
                is_default: true,
            },
        );
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
        RegisteredDevice {
            handle: DeviceHandle::new(provider, device),
            label: "Device".into(),
            capabilities: DeviceCapabilitySet {
                signals_by_id: signals,
                functions_by_name: functions,
            },
        }
    }

    #[test]
    fn register_then_lookup() {
        let reg = DeviceRegistry::new();
        reg.register_provider_devices(&"sim0".to_string(), vec![sample_device("sim0", "dev1")]);
        let d = reg.get("sim0", "dev1").unwrap();
        assert_eq!(d.capabilities.default_signal_ids(), vec!["temp".to_string()]);
        assert!(reg.get_by_handle("sim0/dev1").is_some());
    }

    #[test]
    fn teardown_removes_only_that_provider() {
        let reg = DeviceRegistry::new();
        reg.register_provider_devices(&"sim0".to_string(), vec![sample_device("sim0", "dev1")]);
        reg.register_provider_devices(&"sim1".to_string(), vec![sample_device("sim1", "dev1")]);
        reg.remove_provider(&"sim0".to_string());
        assert!(reg.get("sim0", "dev1").is_none());
        assert!(reg.get("sim1", "dev1").is_some());
    }
}
