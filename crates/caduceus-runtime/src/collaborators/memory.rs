//! In-memory lexical backend.
//!
//! Scores documents by the fraction of query terms they contain. Useful as a
//! reference backend, in tests, and for the CLI's built-in corpus.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::time::Duration;

use caduceus_core::{doc_hash, EvidenceItem, Metadata, RetrievalFilters};

use super::traits::BackendClient;
use crate::error::CollaboratorError;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "what", "are", "how", "with", "that", "this", "from", "our", "does",
    "should", "which", "when", "who", "is", "of", "to", "in", "a", "an", "on", "be", "do",
];

#[derive(Debug, Clone)]
struct Document {
    document_id: String,
    text: String,
    doc_hash: String,
    terms: BTreeSet<String>,
    metadata: Metadata,
}

#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    id: String,
    documents: Vec<Document>,
    latency: Option<Duration>,
}

impl InMemoryBackend {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            documents: Vec::new(),
            latency: None,
        }
    }

    pub fn with_document(
        mut self,
        document_id: impl Into<String>,
        text: impl Into<String>,
        metadata: Metadata,
    ) -> Self {
        let text = text.into();
        self.documents.push(Document {
            document_id: document_id.into(),
            doc_hash: doc_hash(&text),
            terms: terms(&text),
            text,
            metadata,
        });
        self
    }

    /// Delay every search by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl BackendClient for InMemoryBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filters: &RetrievalFilters,
    ) -> Result<Vec<EvidenceItem>, CollaboratorError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let query_terms = terms(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f64, &Document)> = self
            .documents
            .iter()
            .filter(|doc| filters.matches(&doc.metadata))
            .filter_map(|doc| {
                let hits = query_terms.intersection(&doc.terms).count();
                (hits > 0).then(|| (hits as f64 / query_terms.len() as f64, doc))
            })
            .collect();

        scored.sort_by(|(score_a, a), (score_b, b)| {
            score_b
                .total_cmp(score_a)
                .then_with(|| a.document_id.cmp(&b.document_id))
        });

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, doc)| EvidenceItem {
                document_id: doc.document_id.clone(),
                text: doc.text.clone(),
                doc_hash: doc.doc_hash.clone(),
                score,
                backend: self.id.clone(),
                metadata: doc.metadata.clone(),
            })
            .collect())
    }
}

fn terms(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(department: &str) -> Metadata {
        Metadata::from([("department".to_string(), department.to_string())])
    }

    fn backend() -> InMemoryBackend {
        InMemoryBackend::new("faiss")
            .with_document(
                "sepsis-01",
                "Sepsis: administer broad-spectrum antibiotics within one hour of recognition.",
                meta("ED"),
            )
            .with_document(
                "sepsis-02",
                "Sepsis: draw blood cultures before antibiotics.",
                meta("ICU"),
            )
            .with_document("hygiene-01", "Hand hygiene before and after patient contact.", meta("ICU"))
    }

    #[tokio::test]
    async fn test_results_sorted_and_truncated() {
        let items = backend()
            .search("sepsis antibiotic timing recognition", 10, &RetrievalFilters::default())
            .await
            .unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].document_id, "sepsis-01");
        assert!(items[0].score > items[1].score);
        assert_eq!(items[0].doc_hash, doc_hash(&items[0].text));
        assert_eq!(items[0].backend, "faiss");

        let top1 = backend()
            .search("sepsis", 1, &RetrievalFilters::default())
            .await
            .unwrap();
        assert_eq!(top1.len(), 1);
    }

    #[tokio::test]
    async fn test_filters_restrict_results() {
        let filters = RetrievalFilters {
            department: Some("icu".to_string()),
            ..Default::default()
        };
        let items = backend().search("sepsis", 10, &filters).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].document_id, "sepsis-02");
    }

    #[tokio::test]
    async fn test_no_match_is_empty_not_error() {
        let items = backend()
            .search("parking validation", 10, &RetrievalFilters::default())
            .await
            .unwrap();
        assert!(items.is_empty());
    }
}
