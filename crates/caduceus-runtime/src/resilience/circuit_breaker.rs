//! Per-backend circuit breaker.
//!
//! A backend that keeps failing is skipped for `recovery_timeout`, then
//! probed again in half-open state. Skipped backends count as unavailable
//! for the retrieval that skipped them.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::humantime_duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Time an open circuit waits before a half-open probe
    #[serde(default = "default_recovery_timeout", with = "humantime_duration")]
    pub recovery_timeout: Duration,

    /// Half-open successes needed to close
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_recovery_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_success_threshold() -> u32 {
    2
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout: default_recovery_timeout(),
            success_threshold: default_success_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CircuitState {
    Closed { failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { successes: u32 },
}

pub struct CircuitBreaker {
    states: RwLock<HashMap<String, CircuitState>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Whether calls to `backend` should be skipped right now.
    ///
    /// An open circuit whose recovery timeout has elapsed moves to half-open
    /// and lets the call through.
    pub fn is_open(&self, backend: &str) -> bool {
        let mut states = self.states.write();
        match states.get(backend) {
            Some(CircuitState::Open { opened_at }) => {
                if opened_at.elapsed() >= self.config.recovery_timeout {
                    states.insert(backend.to_string(), CircuitState::HalfOpen { successes: 0 });
                    tracing::info!(backend, "Circuit half-open, probing backend");
                    false
                } else {
                    true
                }
            }
            _ => false,
        }
    }

    pub fn record_success(&self, backend: &str) {
        let mut states = self.states.write();
        match states.get(backend).cloned() {
            Some(CircuitState::HalfOpen { successes }) => {
                if successes + 1 >= self.config.success_threshold {
                    states.insert(backend.to_string(), CircuitState::Closed { failures: 0 });
                    tracing::info!(backend, "Circuit closed after successful recovery");
                } else {
                    states.insert(
                        backend.to_string(),
                        CircuitState::HalfOpen {
                            successes: successes + 1,
                        },
                    );
                }
            }
            Some(CircuitState::Closed { failures }) if failures > 0 => {
                states.insert(backend.to_string(), CircuitState::Closed { failures: 0 });
            }
            _ => {}
        }
    }

    pub fn record_failure(&self, backend: &str) {
        let mut states = self.states.write();
        let failures = match states.get(backend) {
            None => 1,
            Some(CircuitState::Closed { failures }) => failures + 1,
            Some(CircuitState::HalfOpen { .. }) => {
                states.insert(
                    backend.to_string(),
                    CircuitState::Open {
                        opened_at: Instant::now(),
                    },
                );
                tracing::warn!(backend, "Circuit reopened after failed recovery probe");
                return;
            }
            Some(CircuitState::Open { .. }) => return,
        };

        if failures >= self.config.failure_threshold {
            states.insert(
                backend.to_string(),
                CircuitState::Open {
                    opened_at: Instant::now(),
                },
            );
            tracing::warn!(backend, failures, "Circuit opened after repeated failures");
        } else {
            states.insert(backend.to_string(), CircuitState::Closed { failures });
        }
    }

    pub fn state(&self, backend: &str) -> CircuitState {
        self.states
            .read()
            .get(backend)
            .cloned()
            .unwrap_or(CircuitState::Closed { failures: 0 })
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
