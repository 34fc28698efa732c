//! Extractive answer generator.
//!
//! Builds a draft from the lead sentence of the top evidence items, citing
//! each one. No language model involved, so every claim is grounded by
//! construction unless the evidence itself is unsafe.

use async_trait::async_trait;

use caduceus_core::{DraftAnswer, EvidenceBundle};

use super::traits::AnswerGenerator;
use crate::error::CollaboratorError;

pub const NO_EVIDENCE_ANSWER: &str =
    "I could not find relevant information to answer your question.";

#[derive(Debug, Clone)]
pub struct ExtractiveGenerator {
    max_claims: usize,
}

impl ExtractiveGenerator {
    pub fn new(max_claims: usize) -> Self {
        Self {
            max_claims: max_claims.max(1),
        }
    }
}

impl Default for ExtractiveGenerator {
    fn default() -> Self {
        Self::new(3)
    }
}

#[async_trait]
impl AnswerGenerator for ExtractiveGenerator {
    async fn generate(
        &self,
        _request_text: &str,
        bundle: &EvidenceBundle,
        prompt_version: Option<&str>,
    ) -> Result<DraftAnswer, CollaboratorError> {
        tracing::debug!(
            items = bundle.items.len(),
            prompt_version = prompt_version.unwrap_or("default"),
            "Generating extractive draft"
        );

        if bundle.is_empty() {
            return Ok(DraftAnswer::new(NO_EVIDENCE_ANSWER));
        }

        let sentences: Vec<(String, &str)> = bundle
            .items
            .iter()
            .take(self.max_claims)
            .map(|item| (lead_sentence(&item.text), item.doc_hash.as_str()))
            .filter(|(sentence, _)| !sentence.is_empty())
            .collect();

        let body: Vec<&str> = sentences.iter().map(|(s, _)| s.as_str()).collect();
        let text = format!("Based on the available documentation: {}", body.join(" "));

        Ok(sentences
            .iter()
            .fold(DraftAnswer::new(text), |draft, (sentence, hash)| {
                draft.claim(sentence.clone(), Some(*hash))
            }))
    }
}

/// First sentence of `text`, terminal punctuation kept.
fn lead_sentence(text: &str) -> String {
    let trimmed = text.trim();
    let end = trimmed
        .char_indices()
        .find(|(i, c)| {
            matches!(c, '.' | '!' | '?')
                && trimmed[i + c.len_utf8()..]
                    .chars()
                    .next()
                    .map_or(true, char::is_whitespace)
        })
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(trimmed.len());
    trimmed[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use caduceus_core::{doc_hash, EvidenceItem, GroundingVerifier, Metadata, RetrievalMode};
    use std::collections::BTreeSet;

    fn bundle(texts: &[&str]) -> EvidenceBundle {
        EvidenceBundle {
            query: "sepsis".to_string(),
            items: texts
                .iter()
                .enumerate()
                .map(|(i, text)| EvidenceItem {
                    document_id: format!("doc-{}", i),
                    text: text.to_string(),
                    doc_hash: doc_hash(text),
                    score: 1.0 - i as f64 * 0.1,
                    backend: "faiss".to_string(),
                    metadata: Metadata::new(),
                })
                .collect(),
            backends_queried: BTreeSet::from(["faiss".to_string()]),
            agreement_score: 1.0,
            selected_backend: Some("faiss".to_string()),
            mode: RetrievalMode::SingleBackend,
        }
    }

    #[test]
    fn test_lead_sentence() {
        assert_eq!(lead_sentence("Give 30 mL/kg. Then reassess."), "Give 30 mL/kg.");
        assert_eq!(lead_sentence("Dose is 2.5 mg daily. More."), "Dose is 2.5 mg daily.");
        assert_eq!(lead_sentence("No terminal punctuation"), "No terminal punctuation");
    }

    #[tokio::test]
    async fn test_empty_bundle_yields_claimless_draft() {
        let draft = ExtractiveGenerator::default()
            .generate("q", &bundle(&[]), None)
            .await
            .unwrap();
        assert_eq!(draft.text, NO_EVIDENCE_ANSWER);
        assert!(draft.claims.is_empty());
    }

    #[tokio::test]
    async fn test_draft_cites_every_claim_and_verifies() {
        let evidence = bundle(&[
            "Antibiotics within one hour of sepsis recognition. Reassess at 3 hours.",
            "Blood cultures are drawn before antibiotics.",
            "Lactate is remeasured if initially elevated.",
            "This fourth item is beyond the claim limit.",
        ]);
        let draft = ExtractiveGenerator::default()
            .generate("q", &evidence, Some("v2"))
            .await
            .unwrap();

        assert_eq!(draft.claims.len(), 3);
        assert_eq!(draft.citations.len(), 3);
        assert_eq!(draft.claims[0].text, "Antibiotics within one hour of sepsis recognition.");
        assert!(GroundingVerifier::new().verify(&draft, &evidence).passed);
    }
}
