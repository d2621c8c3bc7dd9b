//! Device-control runtime core.
//!
//! Owns provider child processes over a framed binary IPC protocol, polls
//! their exposed signals into a state cache, fans out changes over an event
//! bus, and serializes device function calls through a single call router
//! gated by a mode manager. See `runtime::Runtime` for the assembled whole.

pub mod automation;
pub mod cache;
pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod model;
pub mod provider;
pub mod registry;
pub mod runtime;
pub mod transport;

pub use error::{CoreError, ErrorKind, Result};
pub use model::{DeviceHandle, DeviceId, ProviderId, Quality, Value, ValueType};
pub use runtime::{Runtime, Services};
