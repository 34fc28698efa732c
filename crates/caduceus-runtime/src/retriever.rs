//! EvidenceRetriever: fan-out to vector backends and deterministic fan-in.
//!
//! # Execution
//! - One backend: called directly, items propagated unmodified
//! - Several backends: one concurrent call each, every call bounded by its
//!   own timeout and gated by its circuit; the merge starts only after all
//!   calls have settled (join barrier, not race-to-first)
//! - A failing backend is excluded from the merge; retrieval fails only when
//!   every targeted backend failed
//!
//! Merge, agreement and canonical-backend selection are the pure functions
//! in `caduceus_core::retrieval`.

use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use caduceus_core::{
    agreement_score, merge, passthrough, select_backend, validate_request, BackendMetrics,
    BackendResults, EvidenceBundle, EvidenceItem, RequestType, RetrievalFilters, RetrievalMode,
};

use crate::cache::MetricsCache;
use crate::collaborators::BackendClient;
use crate::config::RetrievalConfig;
use crate::error::PipelineError;
use crate::resilience::{CircuitBreaker, RetryingBackend};

/// Input to one retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalRequest {
    pub query: String,
    pub top_k: usize,
    pub filters: RetrievalFilters,
    /// Explicit backends to query. Empty means "use the configured policy".
    pub backend_set: Vec<String>,
    /// Query classification, used for canonical-backend selection.
    pub query_type: RequestType,
}

impl RetrievalRequest {
    pub fn new(query: impl Into<String>, top_k: usize) -> Self {
        Self {
            query: query.into(),
            top_k,
            filters: RetrievalFilters::default(),
            backend_set: Vec::new(),
            query_type: RequestType::Unknown,
        }
    }

    pub fn with_filters(mut self, filters: RetrievalFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_backends<I, S>(mut self, backends: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.backend_set = backends.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_query_type(mut self, query_type: RequestType) -> Self {
        self.query_type = query_type;
        self
    }
}

enum BackendOutcome {
    Items(Vec<EvidenceItem>),
    Failed,
    /// Circuit open; no call was made.
    Skipped,
}

pub struct EvidenceRetriever {
    backends: BTreeMap<String, Arc<dyn BackendClient>>,
    metrics: Option<MetricsCache>,
    breaker: CircuitBreaker,
    config: RetrievalConfig,
}

impl EvidenceRetriever {
    pub fn builder(config: RetrievalConfig) -> EvidenceRetrieverBuilder {
        EvidenceRetrieverBuilder::new(config)
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn backend_ids(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Produce one ranked bundle for `request`.
    pub async fn retrieve(&self, request: &RetrievalRequest) -> Result<EvidenceBundle, PipelineError> {
        validate_request(&request.query, request.top_k)?;

        let targets = self.targets(request)?;

        if let [only] = targets.as_slice() {
            return self.retrieve_single(only, request).await;
        }

        self.retrieve_multi(&targets, request).await
    }

    /// The backend downstream systems should treat as canonical for
    /// `query_type`, chosen from all configured backends.
    pub async fn canonical_backend(&self, query_type: RequestType) -> Option<String> {
        let ids: Vec<String> = self.backends.keys().cloned().collect();
        self.select_canonical(&ids, query_type).await
    }

    fn targets(&self, request: &RetrievalRequest) -> Result<Vec<String>, PipelineError> {
        if self.backends.is_empty() {
            return Err(PipelineError::AllBackendsUnavailable {
                attempted: Vec::new(),
            });
        }

        if !request.backend_set.is_empty() {
            let mut wanted = BTreeSet::new();
            for id in &request.backend_set {
                if !self.backends.contains_key(id) {
                    return Err(PipelineError::InvalidInput(format!(
                        "unknown backend '{}'",
                        id
                    )));
                }
                wanted.insert(id.clone());
            }
            return Ok(wanted.into_iter().collect());
        }

        if self.config.multi_backend {
            return Ok(self.backends.keys().cloned().collect());
        }

        if self.backends.contains_key(&self.config.default_backend) {
            Ok(vec![self.config.default_backend.clone()])
        } else if self.backends.len() == 1 {
            Ok(self.backends.keys().cloned().collect())
        } else {
            Err(PipelineError::InvalidInput(format!(
                "default backend '{}' is not configured",
                self.config.default_backend
            )))
        }
    }

    async fn retrieve_single(
        &self,
        backend: &str,
        request: &RetrievalRequest,
    ) -> Result<EvidenceBundle, PipelineError> {
        let items = match self.call_backend(backend, request).await {
            BackendOutcome::Items(items) => items,
            BackendOutcome::Failed | BackendOutcome::Skipped => {
                return Err(PipelineError::AllBackendsUnavailable {
                    attempted: vec![backend.to_string()],
                })
            }
        };

        let items = passthrough(BackendResults::new(backend, items), request.top_k);
        tracing::info!(backend, items = items.len(), "Single-backend retrieval complete");

        Ok(EvidenceBundle {
            query: request.query.clone(),
            items,
            backends_queried: BTreeSet::from([backend.to_string()]),
            agreement_score: 1.0,
            selected_backend: Some(backend.to_string()),
            mode: RetrievalMode::SingleBackend,
        })
    }

    async fn retrieve_multi(
        &self,
        targets: &[String],
        request: &RetrievalRequest,
    ) -> Result<EvidenceBundle, PipelineError> {
        // Fan-out
        let outcomes = join_all(targets.iter().map(|id| async move {
            (id, self.call_backend(id, request).await)
        }))
        .await;

        // Fan-in, in backend-id order
        let mut queried = BTreeSet::new();
        let mut settled = Vec::new();
        for (id, outcome) in outcomes {
            match outcome {
                BackendOutcome::Items(items) => {
                    queried.insert(id.clone());
                    settled.push(BackendResults::new(id.as_str(), items));
                }
                BackendOutcome::Failed => {
                    queried.insert(id.clone());
                }
                BackendOutcome::Skipped => {}
            }
        }

        if settled.is_empty() {
            return Err(PipelineError::AllBackendsUnavailable {
                attempted: targets.to_vec(),
            });
        }

        let items = merge(&settled, request.top_k);
        let agreement = agreement_score(&settled);
        let responders: Vec<String> = settled.iter().map(|r| r.backend.clone()).collect();
        let selected_backend = self.select_canonical(&responders, request.query_type).await;

        tracing::info!(
            targeted = targets.len(),
            responded = settled.len(),
            items = items.len(),
            agreement,
            selected = selected_backend.as_deref().unwrap_or("none"),
            "Multi-backend retrieval complete"
        );

        Ok(EvidenceBundle {
            query: request.query.clone(),
            items,
            backends_queried: queried,
            agreement_score: agreement,
            selected_backend,
            mode: RetrievalMode::MultiBackend,
        })
    }

    async fn call_backend(&self, id: &str, request: &RetrievalRequest) -> BackendOutcome {
        let Some(client) = self.backends.get(id) else {
            return BackendOutcome::Skipped;
        };

        if self.breaker.is_open(id) {
            tracing::warn!(backend = id, "Circuit open, skipping backend");
            return BackendOutcome::Skipped;
        }

        let timeout = self.config.backend_timeout;
        let call = client.search(&request.query, request.top_k, &request.filters);

        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(items)) if !items.iter().all(|item| (0.0..=1.0).contains(&item.score)) => {
                tracing::warn!(backend = id, "Backend returned scores outside [0, 1]");
                self.breaker.record_failure(id);
                BackendOutcome::Failed
            }
            Ok(Ok(items)) => {
                self.breaker.record_success(id);
                BackendOutcome::Items(items)
            }
            Ok(Err(e)) => {
                tracing::warn!(backend = id, error = e.kind(), "Backend search failed");
                self.breaker.record_failure(id);
                BackendOutcome::Failed
            }
            Err(_) => {
                tracing::warn!(backend = id, timeout = ?timeout, "Backend search timed out");
                self.breaker.record_failure(id);
                BackendOutcome::Failed
            }
        }
    }

    /// Each lookup is bounded by the backend timeout; a lookup that errors
    /// or times out counts as "no history".
    async fn select_canonical(&self, candidates: &[String], query_type: RequestType) -> Option<String> {
        let metrics = self.metrics.as_ref()?;
        let timeout = self.config.backend_timeout;

        let lookups = join_all(candidates.iter().map(|id| async move {
            match tokio::time::timeout(timeout, metrics.lookup(id, query_type)).await {
                Ok(Ok(found)) => found.map(|m| (id.as_str(), m)),
                Ok(Err(e)) => {
                    tracing::warn!(backend = %id, error = e.kind(), "Metrics lookup failed");
                    None
                }
                Err(_) => {
                    tracing::warn!(backend = %id, timeout = ?timeout, "Metrics lookup timed out");
                    None
                }
            }
        }))
        .await;

        select_backend(lookups.into_iter().flatten())
    }
}

/// Builder for [`EvidenceRetriever`].
pub struct EvidenceRetrieverBuilder {
    config: RetrievalConfig,
    backends: BTreeMap<String, Arc<dyn BackendClient>>,
    metrics: Option<MetricsCache>,
}

impl EvidenceRetrieverBuilder {
    pub fn new(config: RetrievalConfig) -> Self {
        Self {
            config,
            backends: BTreeMap::new(),
            metrics: None,
        }
    }

    /// Register a backend. When retries are configured the client is
    /// wrapped in a [`RetryingBackend`].
    pub fn backend(mut self, client: Arc<dyn BackendClient>) -> Self {
        let client: Arc<dyn BackendClient> = if self.config.retry.max_attempts > 1 {
            Arc::new(RetryingBackend::new(client, self.config.retry.clone()))
        } else {
            client
        };
        self.backends.insert(client.id().to_string(), client);
        self
    }

    pub fn metrics(mut self, metrics: MetricsCache) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> EvidenceRetriever {
        EvidenceRetriever {
            breaker: CircuitBreaker::new(self.config.circuit_breaker.clone()),
            backends: self.backends,
            metrics: self.metrics,
            config: self.config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{InMemoryBackend, StaticMetrics};
    use crate::error::CollaboratorError;
    use crate::resilience::RetryConfig;
    use async_trait::async_trait;
    use caduceus_core::Metadata;
    use std::time::Duration;

    const SEPSIS_1: &str = "Sepsis antibiotics are given within one hour of recognition.";
    const SEPSIS_2: &str = "Sepsis blood cultures are drawn before antibiotics.";
    const SEPSIS_3: &str = "Sepsis lactate is remeasured within six hours.";
    const SEPSIS_4: &str = "Sepsis fluid resuscitation uses 30 mL/kg crystalloid.";

    struct Down(&'static str);

    #[async_trait]
    impl BackendClient for Down {
        fn id(&self) -> &str {
            self.0
        }

        async fn search(
            &self,
            _query: &str,
            _top_k: usize,
            _filters: &RetrievalFilters,
        ) -> Result<Vec<EvidenceItem>, CollaboratorError> {
            Err(CollaboratorError::Failed("connection refused".to_string()))
        }
    }

    fn config(multi_backend: bool) -> RetrievalConfig {
        RetrievalConfig {
            multi_backend,
            backend_timeout: Duration::from_secs(1),
            retry: RetryConfig {
                max_attempts: 1,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn memory(id: &str, texts: &[&str]) -> Arc<InMemoryBackend> {
        Arc::new(texts.iter().enumerate().fold(InMemoryBackend::new(id), |b, (i, t)| {
            b.with_document(format!("{}-{}", id, i), *t, Metadata::new())
        }))
    }

    #[tokio::test]
    async fn test_single_backend_passthrough() {
        let backend = memory("faiss", &[SEPSIS_1, SEPSIS_2, SEPSIS_3]);
        let direct = backend
            .search("sepsis antibiotics", 2, &RetrievalFilters::default())
            .await
            .unwrap();

        let retriever = EvidenceRetriever::builder(config(false))
            .backend(backend)
            .build();
        let bundle = retriever
            .retrieve(&RetrievalRequest::new("sepsis antibiotics", 2))
            .await
            .unwrap();

        assert_eq!(bundle.items, direct);
        assert_eq!(bundle.agreement_score, 1.0);
        assert_eq!(bundle.mode, RetrievalMode::SingleBackend);
        assert_eq!(bundle.selected_backend.as_deref(), Some("faiss"));
    }

    #[tokio::test]
    async fn test_multi_backend_merge_and_selection() {
        let metrics = StaticMetrics::new()
            .with("faiss", RequestType::PolicyLookup, BackendMetrics::new(0.7, 30.0))
            .with("pinecone", RequestType::PolicyLookup, BackendMetrics::new(0.9, 90.0));
        let cache = MetricsCache::new(Arc::new(metrics), 100, Duration::from_secs(60));

        let retriever = EvidenceRetriever::builder(config(true))
            .backend(memory("faiss", &[SEPSIS_1, SEPSIS_2, SEPSIS_3]))
            .backend(memory("pinecone", &[SEPSIS_1, SEPSIS_2, SEPSIS_4]))
            .metrics(cache)
            .build();

        let bundle = retriever
            .retrieve(
                &RetrievalRequest::new("sepsis", 10).with_query_type(RequestType::PolicyLookup),
            )
            .await
            .unwrap();

        assert_eq!(bundle.mode, RetrievalMode::MultiBackend);
        assert_eq!(bundle.items.len(), 4);
        assert!((bundle.agreement_score - 2.0 / 4.0).abs() < 1e-12);
        assert_eq!(bundle.selected_backend.as_deref(), Some("pinecone"));
        assert_eq!(
            bundle.backends_queried,
            BTreeSet::from(["faiss".to_string(), "pinecone".to_string()])
        );
        for pair in bundle.items.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_failed_backend_is_excluded() {
        let retriever = EvidenceRetriever::builder(config(true))
            .backend(memory("faiss", &[SEPSIS_1, SEPSIS_2]))
            .backend(Arc::new(Down("weaviate")))
            .build();

        let bundle = retriever
            .retrieve(&RetrievalRequest::new("sepsis", 5))
            .await
            .unwrap();

        assert_eq!(bundle.items.len(), 2);
        assert!(bundle.items.iter().all(|i| i.backend == "faiss"));
        assert_eq!(bundle.agreement_score, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_backend_times_out_and_is_excluded() {
        let slow = InMemoryBackend::new("pinecone")
            .with_document("p-0", SEPSIS_4, Metadata::new())
            .with_latency(Duration::from_secs(30));

        let retriever = EvidenceRetriever::builder(config(true))
            .backend(memory("faiss", &[SEPSIS_1]))
            .backend(Arc::new(slow))
            .build();

        let bundle = retriever
            .retrieve(&RetrievalRequest::new("sepsis", 5))
            .await
            .unwrap();

        assert_eq!(bundle.items.len(), 1);
        assert_eq!(bundle.items[0].backend, "faiss");
        assert!(bundle.backends_queried.contains("pinecone"));
    }

    #[tokio::test]
    async fn test_all_backends_down() {
        let retriever = EvidenceRetriever::builder(config(true))
            .backend(Arc::new(Down("faiss")))
            .backend(Arc::new(Down("weaviate")))
            .build();

        let err = retriever
            .retrieve(&RetrievalRequest::new("sepsis", 5))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            PipelineError::AllBackendsUnavailable {
                attempted: vec!["faiss".to_string(), "weaviate".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn test_invalid_input_fails_fast() {
        let retriever = EvidenceRetriever::builder(config(false))
            .backend(memory("faiss", &[SEPSIS_1]))
            .build();

        let empty = retriever.retrieve(&RetrievalRequest::new("  ", 5)).await;
        let zero = retriever.retrieve(&RetrievalRequest::new("sepsis", 0)).await;
        let unknown = retriever
            .retrieve(&RetrievalRequest::new("sepsis", 5).with_backends(["milvus"]))
            .await;

        assert!(matches!(empty, Err(PipelineError::InvalidInput(_))));
        assert!(matches!(zero, Err(PipelineError::InvalidInput(_))));
        assert!(matches!(unknown, Err(PipelineError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_filters_matching_nothing_give_empty_bundle() {
        let retriever = EvidenceRetriever::builder(config(false))
            .backend(memory("faiss", &[SEPSIS_1]))
            .build();

        let request = RetrievalRequest::new("sepsis", 5).with_filters(RetrievalFilters {
            department: Some("NICU".to_string()),
            ..Default::default()
        });
        let bundle = retriever.retrieve(&request).await.unwrap();
        assert!(bundle.is_empty());
    }

    #[tokio::test]
    async fn test_explicit_backend_set_overrides_mode() {
        let retriever = EvidenceRetriever::builder(config(true))
            .backend(memory("faiss", &[SEPSIS_1]))
            .backend(memory("pinecone", &[SEPSIS_4]))
            .build();

        let bundle = retriever
            .retrieve(&RetrievalRequest::new("sepsis", 5).with_backends(["pinecone"]))
            .await
            .unwrap();

        assert_eq!(bundle.mode, RetrievalMode::SingleBackend);
        assert_eq!(bundle.items[0].backend, "pinecone");
    }

    #[tokio::test]
    async fn test_open_circuit_skips_backend() {
        let mut cfg = config(true);
        cfg.circuit_breaker.failure_threshold = 1;

        let retriever = EvidenceRetriever::builder(cfg)
            .backend(memory("faiss", &[SEPSIS_1]))
            .backend(Arc::new(Down("weaviate")))
            .build();

        retriever.retrieve(&RetrievalRequest::new("sepsis", 5)).await.unwrap();
        assert!(retriever.breaker().is_open("weaviate"));

        let bundle = retriever.retrieve(&RetrievalRequest::new("sepsis", 5)).await.unwrap();
        assert!(!bundle.backends_queried.contains("weaviate"));
    }

    struct HungMetrics;

    #[async_trait]
    impl crate::collaborators::HistoricalMetrics for HungMetrics {
        async fn lookup(
            &self,
            _backend_id: &str,
            _query_type: RequestType,
        ) -> Result<Option<BackendMetrics>, CollaboratorError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_metrics_store_does_not_stall_retrieval() {
        let cache = MetricsCache::new(Arc::new(HungMetrics), 100, Duration::from_secs(60));
        let retriever = EvidenceRetriever::builder(config(true))
            .backend(memory("faiss", &[SEPSIS_1]))
            .backend(memory("pinecone", &[SEPSIS_4]))
            .metrics(cache)
            .build();

        let started = tokio::time::Instant::now();
        let bundle = retriever
            .retrieve(&RetrievalRequest::new("sepsis", 5))
            .await
            .unwrap();

        assert_eq!(bundle.items.len(), 2);
        assert_eq!(bundle.selected_backend, None);
        // Lookups run concurrently, so one timeout covers both.
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_out_of_range_scores_fail_the_backend() {
        struct Overconfident;

        #[async_trait]
        impl BackendClient for Overconfident {
            fn id(&self) -> &str {
                "pinecone"
            }

            async fn search(
                &self,
                _query: &str,
                _top_k: usize,
                _filters: &RetrievalFilters,
            ) -> Result<Vec<EvidenceItem>, CollaboratorError> {
                let mut item = EvidenceItem {
                    document_id: "p-0".to_string(),
                    text: SEPSIS_4.to_string(),
                    doc_hash: caduceus_core::doc_hash(SEPSIS_4),
                    score: f64::NAN,
                    backend: "pinecone".to_string(),
                    metadata: Metadata::new(),
                };
                let mut high = item.clone();
                high.score = 3.0;
                item.document_id = "p-1".to_string();
                Ok(vec![item, high])
            }
        }

        let mut cfg = config(true);
        cfg.circuit_breaker.failure_threshold = 1;
        let retriever = EvidenceRetriever::builder(cfg)
            .backend(memory("faiss", &[SEPSIS_1]))
            .backend(Arc::new(Overconfident))
            .build();

        let bundle = retriever
            .retrieve(&RetrievalRequest::new("sepsis", 5))
            .await
            .unwrap();

        assert!(bundle.items.iter().all(|i| i.backend == "faiss"));
        assert!(bundle.backends_queried.contains("pinecone"));
        assert!(retriever.breaker().is_open("pinecone"));
    }

    #[tokio::test]
    async fn test_canonical_backend_without_metrics() {
        let retriever = EvidenceRetriever::builder(config(true))
            .backend(memory("faiss", &[SEPSIS_1]))
            .build();
        assert_eq!(retriever.canonical_backend(RequestType::PolicyLookup).await, None);
    }
}
