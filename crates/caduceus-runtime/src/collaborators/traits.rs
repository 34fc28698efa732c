//! Contracts for the pipeline's external collaborators.

use async_trait::async_trait;

use caduceus_core::{
    BackendMetrics, DraftAnswer, EvidenceBundle, EvidenceItem, RequestPlan, RequestType,
    RetrievalFilters,
};

use crate::error::CollaboratorError;

/// Classifies a request into a plan. May call a language model.
#[async_trait]
pub trait IntakeClassifier: Send + Sync {
    async fn classify(&self, request_text: &str) -> Result<RequestPlan, CollaboratorError>;
}

/// One vector backend.
///
/// # Contract
/// - Items come back score-descending, at most `top_k` of them
/// - Items not matching `filters` are excluded; no match is `Ok(vec![])`
/// - Embedding the query is the backend's concern
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Stable identifier, used for merging, selection and circuit breaking.
    fn id(&self) -> &str;

    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filters: &RetrievalFilters,
    ) -> Result<Vec<EvidenceItem>, CollaboratorError>;
}

/// Historical backend performance per query type.
///
/// `Ok(None)` means no history is recorded for the pair.
#[async_trait]
pub trait HistoricalMetrics: Send + Sync {
    async fn lookup(
        &self,
        backend_id: &str,
        query_type: RequestType,
    ) -> Result<Option<BackendMetrics>, CollaboratorError>;
}

/// Turns a request and its evidence into a cited draft. Usually an LLM call.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(
        &self,
        request_text: &str,
        bundle: &EvidenceBundle,
        prompt_version: Option<&str>,
    ) -> Result<DraftAnswer, CollaboratorError>;
}
