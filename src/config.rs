//! Configuration data shapes (spec §6 "Configuration inputs").
//!
//! These structs are the contract an external config loader (TOML/JSON,
//! out of scope for this crate — spec §1) populates; nothing here reads a
//! file or parses a format.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::Deserialize;

use crate::model::{ProviderId, ValueType};

fn default_timeout_ms() -> u64 {
    5000
}
fn default_hello_timeout_ms() -> u64 {
    5000
}
fn default_ready_timeout_ms() -> u64 {
    60000
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestartPolicyConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub backoff_ms: Vec<u64>,
    #[serde(default = "default_restart_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub success_reset_ms: u64,
}

fn default_restart_timeout_ms() -> u64 {
    1000
}

impl RestartPolicyConfig {
    /// Validates the structural constraints spec §6 names:
    /// `max_attempts >= 1`, `backoff_ms.len() == max_attempts`, each
    /// `backoff_ms[i] >= 0` (guaranteed by the unsigned type),
    /// `timeout_ms >= 1000`, `success_reset_ms >= 0` (guaranteed by type).
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts < 1 {
            return Err("max_attempts must be >= 1".into());
        }
        if self.backoff_ms.len() != self.max_attempts as usize {
            return Err(format!(
                "backoff_ms length ({}) must equal max_attempts ({})",
                self.backoff_ms.len(),
                self.max_attempts
            ));
        }
        if self.timeout_ms < 1000 {
            return Err("timeout_ms must be >= 1000".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_hello_timeout_ms")]
    pub hello_timeout_ms: u64,
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    pub restart_policy: RestartPolicyConfig,
}

/// `BLOCK` or `OVERRIDE`, applied when in `AUTO` mode (spec §6, §8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ManualGatingPolicy {
    Block,
    Override,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventBusConfig {
    #[serde(default = "default_queue_size")]
    pub default_queue_size: usize,
    #[serde(default = "default_max_subscribers")]
    pub max_subscribers: usize,
}

fn default_queue_size() -> usize {
    100
}
fn default_max_subscribers() -> usize {
    32
}

impl Default for EventBusConfig {
    fn default() -> Self {
        EventBusConfig {
            default_queue_size: default_queue_size(),
            max_subscribers: default_max_subscribers(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParameterDefConfig {
    pub name: String,
    pub value_type: ValueType,
    pub default: crate::model::Value,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub allowed_strings: Option<HashSet<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    pub providers: Vec<ProviderConfig>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    pub initial_mode: crate::automation::mode::RuntimeMode,
    pub manual_gating_policy: ManualGatingPolicy,
    #[serde(default)]
    pub event_bus: EventBusConfig,
    #[serde(default)]
    pub parameters: Vec<ParameterDefConfig>,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval_ms < 100 {
            return Err("poll_interval_ms must be >= 100".into());
        }
        for p in &self.providers {
            p.restart_policy
                .validate()
                .map_err(|e| format!("provider '{}': {e}", p.id))?;
        }
        Ok(())
    }
}

/// Per-provider exchange timeouts, looked up by both the state cache and
/// the call router so they bound a `ProviderSession::exchange` the same
/// way regardless of which component issued it. Falls back to the
/// protocol's documented default (spec §6) for a provider id it has no
/// entry for.
#[derive(Debug, Clone, Default)]
pub struct TimeoutTable {
    by_provider: HashMap<ProviderId, Duration>,
}

impl TimeoutTable {
    pub fn from_providers(providers: &[ProviderConfig]) -> Self {
        TimeoutTable {
            by_provider: providers
                .iter()
                .map(|p| (p.id.clone(), Duration::from_millis(p.timeout_ms)))
                .collect(),
        }
    }

    pub fn get(&self, provider_id: &str) -> Duration {
        self.by_provider
            .get(provider_id)
            .copied()
            .unwrap_or_else(|| Duration::from_millis(default_timeout_ms()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_policy_rejects_mismatched_backoff_length() {
        let p = RestartPolicyConfig {
            enabled: true,
            max_attempts: 3,
            backoff_ms: vec![100, 200],
            timeout_ms: 5000,
            success_reset_ms: 0,
        };
        assert!(p.validate().is_err());
    }

    #[test]
    fn restart_policy_accepts_matching_backoff_length() {
        let p = RestartPolicyConfig {
            enabled: true,
            max_attempts: 2,
            backoff_ms: vec![100, 200],
            timeout_ms: 5000,
            success_reset_ms: 0,
        };
        assert!(p.validate().is_ok());
    }
}
