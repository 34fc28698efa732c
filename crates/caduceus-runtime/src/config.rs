//! Runtime configuration.
//!
//! Loaded from YAML. Every field has a default, so an empty document is a
//! valid configuration. Durations are written in humantime form (`5s`,
//! `200ms`, `3m`).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use caduceus_core::{RedactionMode, VerifierConfig};

use crate::resilience::{CircuitBreakerConfig, RetryConfig};

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Pipeline is missing a collaborator: {0}")]
    MissingCollaborator(&'static str),
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub metrics_cache: MetricsCacheConfig,

    #[serde(default)]
    pub verifier: VerifierSettings,

    #[serde(default)]
    pub steps: StepTimeouts,

    /// Passed through to the answer generator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_version: Option<String>,
}

impl RuntimeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = if yaml.trim().is_empty() {
            RuntimeConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        let r = &self.retrieval;

        if r.top_k == 0 {
            return invalid("retrieval.top_k must be positive");
        }
        if r.default_backend.trim().is_empty() {
            return invalid("retrieval.default_backend must not be empty");
        }
        if r.backend_timeout.is_zero() {
            return invalid("retrieval.backend_timeout must be non-zero");
        }
        if r.circuit_breaker.failure_threshold == 0 || r.circuit_breaker.success_threshold == 0 {
            return invalid("retrieval.circuit_breaker thresholds must be positive");
        }
        if r.circuit_breaker.recovery_timeout.is_zero() {
            return invalid("retrieval.circuit_breaker.recovery_timeout must be non-zero");
        }
        if r.retry.max_attempts == 0 {
            return invalid("retrieval.retry.max_attempts must be at least 1");
        }
        if r.retry.min_delay > r.retry.max_delay {
            return invalid("retrieval.retry.min_delay must not exceed max_delay");
        }
        if self.metrics_cache.max_entries == 0 || self.metrics_cache.ttl.is_zero() {
            return invalid("metrics_cache.max_entries and ttl must be positive");
        }

        let s = &self.steps;
        if s.intake_timeout.is_zero()
            || s.synthesis_timeout.is_zero()
            || s.verification_timeout.is_zero()
        {
            return invalid("steps timeouts must be non-zero");
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Fan out to every configured backend when no backend set is given.
    #[serde(default)]
    pub multi_backend: bool,

    #[serde(default = "default_backend")]
    pub default_backend: String,

    /// Bound on each backend call, retries included.
    #[serde(default = "default_backend_timeout", with = "humantime_duration")]
    pub backend_timeout: Duration,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_top_k() -> usize {
    10
}

fn default_backend() -> String {
    "faiss".to_string()
}

fn default_backend_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            multi_backend: false,
            default_backend: default_backend(),
            backend_timeout: default_backend_timeout(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsCacheConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,

    #[serde(default = "default_ttl", with = "humantime_duration")]
    pub ttl: Duration,
}

fn default_max_entries() -> u64 {
    1000
}

fn default_ttl() -> Duration {
    Duration::from_secs(300)
}

impl Default for MetricsCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            ttl: default_ttl(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifierSettings {
    #[serde(default)]
    pub aggressive_redaction: bool,

    #[serde(default = "default_true")]
    pub scan_evidence_for_injection: bool,
}

fn default_true() -> bool {
    true
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            aggressive_redaction: false,
            scan_evidence_for_injection: true,
        }
    }
}

impl VerifierSettings {
    pub fn redaction_mode(&self) -> RedactionMode {
        if self.aggressive_redaction {
            RedactionMode::Aggressive
        } else {
            RedactionMode::Standard
        }
    }

    pub fn verifier_config(&self) -> VerifierConfig {
        VerifierConfig {
            redaction: self.redaction_mode(),
            scan_evidence_for_injection: self.scan_evidence_for_injection,
        }
    }
}

/// Per-step bounds on collaborator calls. Exceeding one fails the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepTimeouts {
    #[serde(default = "default_intake_timeout", with = "humantime_duration")]
    pub intake_timeout: Duration,

    #[serde(default = "default_synthesis_timeout", with = "humantime_duration")]
    pub synthesis_timeout: Duration,

    #[serde(default = "default_verification_timeout", with = "humantime_duration")]
    pub verification_timeout: Duration,
}

fn default_intake_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_synthesis_timeout() -> Duration {
    Duration::from_secs(180)
}

fn default_verification_timeout() -> Duration {
    Duration::from_secs(60)
}

impl Default for StepTimeouts {
    fn default() -> Self {
        Self {
            intake_timeout: default_intake_timeout(),
            synthesis_timeout: default_synthesis_timeout(),
            verification_timeout: default_verification_timeout(),
        }
    }
}

/// Serde adapter for humantime durations (`"250ms"`, `"5s"`, `"2m"`).
pub(crate) mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
