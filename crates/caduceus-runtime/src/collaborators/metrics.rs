//! Fixed historical-metrics table.

use async_trait::async_trait;
use std::collections::HashMap;

use caduceus_core::{BackendMetrics, RequestType};

use super::traits::HistoricalMetrics;
use crate::error::CollaboratorError;

/// Metrics keyed by backend and query type, with an optional per-backend
/// fallback for query types that have no entry of their own.
#[derive(Debug, Clone, Default)]
pub struct StaticMetrics {
    by_type: HashMap<(String, RequestType), BackendMetrics>,
    fallback: HashMap<String, BackendMetrics>,
}

impl StaticMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(
        mut self,
        backend_id: impl Into<String>,
        query_type: RequestType,
        metrics: BackendMetrics,
    ) -> Self {
        self.by_type.insert((backend_id.into(), query_type), metrics);
        self
    }

    pub fn with_fallback(mut self, backend_id: impl Into<String>, metrics: BackendMetrics) -> Self {
        self.fallback.insert(backend_id.into(), metrics);
        self
    }
}

#[async_trait]
impl HistoricalMetrics for StaticMetrics {
    async fn lookup(
        &self,
        backend_id: &str,
        query_type: RequestType,
    ) -> Result<Option<BackendMetrics>, CollaboratorError> {
        Ok(self
            .by_type
            .get(&(backend_id.to_string(), query_type))
            .or_else(|| self.fallback.get(backend_id))
            .copied())
    }
}
