//! Caching layer for historical backend metrics.
//!
//! Backend selection runs on every multi-backend retrieval; the metrics
//! store only changes on its own schedule, so lookups are cached with a TTL.

use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

use caduceus_core::{BackendMetrics, RequestType};

use crate::collaborators::HistoricalMetrics;
use crate::config::MetricsCacheConfig;
use crate::error::CollaboratorError;

type CacheKey = (String, RequestType);

/// Read-through TTL cache in front of a [`HistoricalMetrics`] source.
///
/// "No history" answers are cached too. Errors are not.
pub struct MetricsCache {
    source: Arc<dyn HistoricalMetrics>,
    cache: Cache<CacheKey, Option<BackendMetrics>>,
}

impl MetricsCache {
    pub fn new(source: Arc<dyn HistoricalMetrics>, max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { source, cache }
    }

    pub fn from_config(source: Arc<dyn HistoricalMetrics>, config: &MetricsCacheConfig) -> Self {
        Self::new(source, config.max_entries, config.ttl)
    }

    pub async fn lookup(
        &self,
        backend_id: &str,
        query_type: RequestType,
    ) -> Result<Option<BackendMetrics>, CollaboratorError> {
        let key = (backend_id.to_string(), query_type);
        if let Some(cached) = self.cache.get(&key).await {
            return Ok(cached);
        }

        let fresh = self.source.lookup(backend_id, query_type).await?;
        self.cache.insert(key, fresh).await;
        Ok(fresh)
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HistoricalMetrics for Counting {
        async fn lookup(
            &self,
            backend_id: &str,
            _query_type: RequestType,
        ) -> Result<Option<BackendMetrics>, CollaboratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match backend_id {
                "down" => Err(CollaboratorError::Unavailable("metrics store".to_string())),
                "faiss" => Ok(Some(BackendMetrics::new(0.8, 40.0))),
                _ => Ok(None),
            }
        }
    }

    fn counting() -> Arc<Counting> {
        Arc::new(Counting {
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_hits_are_served_from_cache() {
        let source = counting();
        let cache = MetricsCache::new(source.clone(), 100, Duration::from_secs(60));

        for _ in 0..3 {
            let metrics = cache.lookup("faiss", RequestType::PolicyLookup).await.unwrap();
            assert_eq!(metrics, Some(BackendMetrics::new(0.8, 40.0)));
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        cache.lookup("faiss", RequestType::ExplainPolicy).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_history_is_cached() {
        let source = counting();
        let cache = MetricsCache::new(source.clone(), 100, Duration::from_secs(60));

        assert_eq!(cache.lookup("weaviate", RequestType::Unknown).await.unwrap(), None);
        assert_eq!(cache.lookup("weaviate", RequestType::Unknown).await.unwrap(), None);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let source = counting();
        let cache = MetricsCache::new(source.clone(), 100, Duration::from_secs(60));

        assert!(cache.lookup("down", RequestType::Unknown).await.is_err());
        assert!(cache.lookup("down", RequestType::Unknown).await.is_err());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }
}
