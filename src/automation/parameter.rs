//! Typed, bounded runtime parameters (spec §4.9).
//!
//! Grounded on `original_source/core/automation/parameter_manager.{hpp,cpp}`
//! and `parameter_types.hpp`: `define`/`set`/`get` with numeric-range or
//! string-enum validation, no-op same-value `set`, and post-unlock change
//! callbacks — the same shape as [`super::mode::ModeManager`].

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use log::{error, info, warn};

use crate::model::{Value, ValueType};

/// A defined parameter's constraints, validated against on every `set`.
#[derive(Debug, Clone)]
pub struct ParameterDef {
    pub name: String,
    pub value_type: ValueType,
    pub value: Value,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub allowed_strings: Option<Vec<String>>,
}

impl ParameterDef {
    fn validate(&self, new_value: &Value) -> Result<(), String> {
        if new_value.value_type() != self.value_type {
            return Err(format!(
                "type mismatch: expected {}, got {}",
                self.value_type,
                new_value.value_type()
            ));
        }
        match new_value {
            Value::Double(v) => self.check_numeric_bounds(*v)?,
            Value::Int64(v) => self.check_numeric_bounds(*v as f64)?,
            Value::String(v) => {
                if let Some(allowed) = &self.allowed_strings {
                    if !allowed.iter().any(|a| a == v) {
                        return Err(format!(
                            "value '{v}' not in allowed values: [{}]",
                            allowed.join(", ")
                        ));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn check_numeric_bounds(&self, numeric: f64) -> Result<(), String> {
        if let Some(min) = self.min {
            if numeric < min {
                return Err(format!("value {numeric} is below minimum {min}"));
            }
        }
        if let Some(max) = self.max {
            if numeric > max {
                return Err(format!("value {numeric} exceeds maximum {max}"));
            }
        }
        Ok(())
    }
}

type ParameterChangeCallback = dyn Fn(&str, &Value, &Value) + Send + Sync;

/// Thread-safe store of typed runtime parameters.
#[derive(Default)]
pub struct ParameterStore {
    parameters: Mutex<HashMap<String, ParameterDef>>,
    callbacks: Mutex<Vec<Arc<ParameterChangeCallback>>>,
}

impl ParameterStore {
    pub fn new() -> Self {
        ParameterStore::default()
    }

    /// Defines a new parameter. Rejects a name that already exists, or a
    /// default value that fails its own constraints (spec §4.9).
    pub fn define(
        &self,
        name: impl Into<String>,
        value_type: ValueType,
        default_value: Value,
        min: Option<f64>,
        max: Option<f64>,
        allowed_strings: Option<Vec<String>>,
    ) -> Result<(), String> {
        let name = name.into();
        let mut parameters = self.parameters.lock().expect("parameter store lock poisoned");
        if parameters.contains_key(&name) {
            let msg = format!("parameter '{name}' already defined");
            warn!("{msg}");
            return Err(msg);
        }
        let def = ParameterDef {
            name: name.clone(),
            value_type,
            value: default_value.clone(),
            min,
            max,
            allowed_strings,
        };
        if let Err(e) = def.validate(&default_value) {
            let msg = format!("parameter '{name}' default value invalid: {e}");
            error!("{msg}");
            return Err(msg);
        }
        parameters.insert(name, def);
        Ok(())
    }

    /// Sets a parameter's value after validating it against the parameter's
    /// constraints. A value equal to the current one is a no-op: success,
    /// no callback invocation (spec §4.9).
    pub fn set(&self, name: &str, value: Value) -> Result<(), String> {
        let (old_value, new_value) = {
            let mut parameters = self.parameters.lock().expect("parameter store lock poisoned");
            let def = parameters
                .get_mut(name)
                .ok_or_else(|| format!("parameter '{name}' not found"))?;
            def.validate(&value)?;
            if def.value == value {
                return Ok(());
            }
            let old_value = def.value.clone();
            def.value = value.clone();
            info!("parameter '{name}' updated");
            (old_value, value)
        };

        let snapshot: Vec<Arc<ParameterChangeCallback>> = {
            let callbacks = self.callbacks.lock().expect("parameter store lock poisoned");
            callbacks.clone()
        };
        for callback in &snapshot {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(name, &old_value, &new_value))).is_err() {
                error!("parameter change callback panicked for '{name}'");
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.parameters
            .lock()
            .expect("parameter store lock poisoned")
            .get(name)
            .map(|def| def.value.clone())
    }

    pub fn get_definition(&self, name: &str) -> Option<ParameterDef> {
        self.parameters
            .lock()
            .expect("parameter store lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn has_parameter(&self, name: &str) -> bool {
        self.parameters.lock().expect("parameter store lock poisoned").contains_key(name)
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.lock().expect("parameter store lock poisoned").len()
    }

    pub fn on_parameter_change(&self, callback: impl Fn(&str, &Value, &Value) + Send + Sync + 'static) {
        self.callbacks
            .lock()
            .expect("parameter store lock poisoned")
            .push(Arc::new(callback));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_then_get_returns_default() {
        let store = ParameterStore::new();
        store
            .define("temp_setpoint", ValueType::Double, Value::Double(25.0), Some(10.0), Some(50.0), None)
            .unwrap();
        assert_eq!(store.get("temp_setpoint"), Some(Value::Double(25.0)));
    }

    #[test]
    fn redefine_is_rejected() {
        let store = ParameterStore::new();
        store
            .define("x", ValueType::Bool, Value::Bool(false), None, None, None)
            .unwrap();
        assert!(store.define("x", ValueType::Bool, Value::Bool(true), None, None, None).is_err());
    }

    #[test]
    fn set_out_of_range_is_rejected_and_state_unchanged() {
        let store = ParameterStore::new();
        store
            .define("temp_setpoint", ValueType::Double, Value::Double(25.0), Some(10.0), Some(50.0), None)
            .unwrap();
        assert!(store.set("temp_setpoint", Value::Double(100.0)).is_err());
        assert_eq!(store.get("temp_setpoint"), Some(Value::Double(25.0)));
    }

    #[test]
    fn set_disallowed_string_is_rejected() {
        let store = ParameterStore::new();
        store
            .define(
                "unit",
                ValueType::String,
                Value::String("celsius".into()),
                None,
                None,
                Some(vec!["celsius".into(), "fahrenheit".into()]),
            )
            .unwrap();
        assert!(store.set("unit", Value::String("kelvin".into())).is_err());
    }

    #[test]
    fn set_same_value_does_not_invoke_callback() {
        let store = ParameterStore::new();
        store
            .define("x", ValueType::Int64, Value::Int64(1), None, None, None)
            .unwrap();
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let calls2 = calls.clone();
        store.on_parameter_change(move |_, _, _| {
            calls2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        store.set("x", Value::Int64(1)).unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        store.set("x", Value::Int64(2)).unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
