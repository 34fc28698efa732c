//! Collaborator-owned retries for retrieval backends.
//!
//! The run machine never retries a step. Transient backend errors are
//! retried here, inside the backend call, with exponential backoff.

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use caduceus_core::{EvidenceItem, RetrievalFilters};

use crate::collaborators::BackendClient;
use crate::config::humantime_duration;
use crate::error::CollaboratorError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts, first call included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    #[serde(default = "default_min_delay", with = "humantime_duration")]
    pub min_delay: Duration,

    #[serde(default = "default_max_delay", with = "humantime_duration")]
    pub max_delay: Duration,
}

fn default_max_attempts() -> usize {
    3
}

fn default_min_delay() -> Duration {
    Duration::from_millis(200)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(2)
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            min_delay: default_min_delay(),
            max_delay: default_max_delay(),
        }
    }
}

impl RetryConfig {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1))
    }
}

/// Wraps a backend and retries its retryable errors.
pub struct RetryingBackend {
    inner: Arc<dyn BackendClient>,
    config: RetryConfig,
}

impl RetryingBackend {
    pub fn new(inner: Arc<dyn BackendClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl BackendClient for RetryingBackend {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filters: &RetrievalFilters,
    ) -> Result<Vec<EvidenceItem>, CollaboratorError> {
        let inner = &self.inner;
        let backend = inner.id();

        (move || async move { inner.search(query, top_k, filters).await })
            .retry(self.config.backoff())
            .when(CollaboratorError::is_retryable)
            .notify(|err: &CollaboratorError, delay: Duration| {
                tracing::debug!(backend, error = err.kind(), delay = ?delay, "Retrying backend search");
            })
            .await
    }
}
