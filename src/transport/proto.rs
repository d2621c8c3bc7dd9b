//! ADPP wire envelope: the request/response kinds exchanged with a provider
//! process (spec §6). Encoded with `bincode` over the length-prefixed frame
//! transport.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, ErrorKind};
use crate::model::{Quality, Value, ValueType};

/// Closed set of status codes a provider response can carry, mapped
/// one-for-one onto [`crate::error::ErrorKind`] by the session layer
/// (spec §6, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    Ok,
    InvalidArgument,
    NotFound,
    FailedPrecondition,
    Unavailable,
    DeadlineExceeded,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
}

impl Status {
    pub fn ok() -> Self {
        Status {
            code: StatusCode::Ok,
            message: String::new(),
        }
    }

    /// Maps a non-`Ok` status one-for-one onto the router's error taxonomy
    /// (spec §6, §7). Panics if called on an `Ok` status — callers check
    /// `status.code` first.
    pub fn to_core_error(&self) -> CoreError {
        let kind = match self.code {
            StatusCode::Ok => unreachable!("to_core_error called on an Ok status"),
            StatusCode::InvalidArgument => ErrorKind::InvalidArgument,
            StatusCode::NotFound => ErrorKind::NotFound,
            StatusCode::FailedPrecondition => ErrorKind::FailedPrecondition,
            StatusCode::Unavailable => ErrorKind::Unavailable,
            StatusCode::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            StatusCode::Internal => ErrorKind::Internal,
        };
        CoreError::new(kind, self.message.clone())
    }
}

/// One request envelope. `request_id` is assigned by the session and is
/// unique and monotonic within it (spec §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub request_id: u32,
    pub body: RequestBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestBody {
    Hello {
        protocol_version: String,
        client_name: String,
        client_version: String,
    },
    WaitReady,
    ListDevices,
    DescribeDevice {
        device_id: String,
    },
    ReadSignals {
        device_id: String,
        signal_ids: Vec<String>,
    },
    Call {
        device_id: String,
        function_id: u32,
        function_name: String,
        args: HashMap<String, Value>,
    },
}

/// Matching response envelope. `request_id` must match the request that
/// produced it; a mismatch is a protocol error (spec §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub request_id: u32,
    pub status: Status,
    pub body: ResponseBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponseBody {
    Hello {
        provider_name: String,
        provider_version: String,
    },
    WaitReady,
    ListDevices {
        devices: Vec<DeviceSummary>,
    },
    DescribeDevice {
        device_id: String,
        label: String,
        signals: Vec<WireSignalSpec>,
        functions: Vec<WireFunctionSpec>,
    },
    ReadSignals {
        values: Vec<WireSignalValue>,
    },
    Call {
        results: HashMap<String, Value>,
    },
    /// Carried when `status.code != Ok` and no kind-specific body applies.
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub device_id: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireSignalSpec {
    pub signal_id: String,
    pub label: String,
    pub value_type: ValueType,
    pub poll_hint_hz: f64,
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireArgSpec {
    pub name: String,
    pub value_type: ValueType,
    pub required: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFunctionSpec {
    pub function_id: u32,
    pub name: String,
    pub description: String,
    pub args: Vec<WireArgSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireSignalValue {
    pub signal_id: String,
    pub value: Value,
    pub quality: Quality,
    pub timestamp_ms: u64,
}

/// Encodes a [`Request`]/[`Response`] to its wire payload bytes.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(value)
}

/// Decodes a wire payload back into `T`.
pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, bincode::Error> {
    bincode::deserialize(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_bincode() {
        let req = Request {
            request_id: 7,
            body: RequestBody::ReadSignals {
                device_id: "dev1".into(),
                signal_ids: vec!["temp".into()],
            },
        };
        let bytes = encode(&req).unwrap();
        let back: Request = decode(&bytes).unwrap();
        assert_eq!(back.request_id, 7);
        matches!(back.body, RequestBody::ReadSignals { .. });
    }
}
