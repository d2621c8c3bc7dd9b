//! Core data model: [`Value`], [`Quality`], and the device handle string
//! format (spec §3).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A tagged union over the value types a signal or call argument can carry.
///
/// Equality is structural; for `Double` it is bitwise (`to_bits()`) so that
/// `NaN == NaN` and `+0.0 != -0.0`, because the state cache must not emit a
/// change event for a floating-point non-change (spec §3, §8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Double(f64),
    Int64(i64),
    Uint64(u64),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::Uint64(a), Value::Uint64(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            _ => false,
        }
    }
}
impl Eq for Value {}

impl Value {
    /// The [`ValueType`] this value carries.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Double(_) => ValueType::Double,
            Value::Int64(_) => ValueType::Int64,
            Value::Uint64(_) => ValueType::Uint64,
            Value::Bool(_) => ValueType::Bool,
            Value::String(_) => ValueType::String,
            Value::Bytes(_) => ValueType::Bytes,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

/// The declared type of a [`Value`], used for signal specs and parameter
/// definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Double,
    Int64,
    Uint64,
    Bool,
    String,
    Bytes,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueType::Double => "double",
            ValueType::Int64 => "int64",
            ValueType::Uint64 => "uint64",
            ValueType::Bool => "bool",
            ValueType::String => "string",
            ValueType::Bytes => "bytes",
        };
        f.write_str(s)
    }
}

/// Liveness/fidelity tag on a cached signal value. Anything other than
/// `Ok` means downstream consumers should treat the value as suspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quality {
    Ok,
    Stale,
    Unavailable,
    Fault,
    Unknown,
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Quality::Ok => "OK",
            Quality::Stale => "STALE",
            Quality::Unavailable => "UNAVAILABLE",
            Quality::Fault => "FAULT",
            Quality::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Opaque short string identifying a provider, unique within the runtime.
pub type ProviderId = String;

/// Opaque short string identifying a device within a provider.
pub type DeviceId = String;

/// `(provider_id, device_id)` pair. Its canonical external form is
/// `provider_id/device_id`, the only form accepted on the boundary
/// (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceHandle {
    pub provider_id: ProviderId,
    pub device_id: DeviceId,
}

impl DeviceHandle {
    pub fn new(provider_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        DeviceHandle {
            provider_id: provider_id.into(),
            device_id: device_id.into(),
        }
    }

    /// Parses the canonical `provider_id/device_id` form. Empty components
    /// are rejected with `InvalidArgument` (spec §4.10 step 2).
    pub fn parse(handle: &str) -> Result<Self, CoreError> {
        let Some(slash) = handle.find('/') else {
            return Err(CoreError::invalid_argument(format!(
                "invalid device handle format (expected 'provider/device'): {handle}"
            )));
        };
        let (provider_id, rest) = handle.split_at(slash);
        let device_id = &rest[1..];
        if provider_id.is_empty() || device_id.is_empty() {
            return Err(CoreError::invalid_argument(format!(
                "invalid device handle (empty provider or device): {handle}"
            )));
        }
        Ok(DeviceHandle::new(provider_id, device_id))
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider_id, self.device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_equality_is_bitwise() {
        assert_eq!(Value::Double(f64::NAN), Value::Double(f64::NAN));
        assert_ne!(Value::Double(0.0), Value::Double(-0.0));
        assert_eq!(Value::Double(1.5), Value::Double(1.5));
    }

    #[test]
    fn handle_round_trips() {
        for s in ["sim0/dev1", "a/b", "provider-1/device-2"] {
            let h = DeviceHandle::parse(s).unwrap();
            assert_eq!(h.to_string(), s);
        }
    }

    #[test]
    fn handle_rejects_missing_slash() {
        assert!(DeviceHandle::parse("nodash").is_err());
    }

    #[test]
    fn handle_rejects_empty_components() {
        assert!(DeviceHandle::parse("/dev1").is_err());
        assert!(DeviceHandle::parse("sim0/").is_err());
    }
}
