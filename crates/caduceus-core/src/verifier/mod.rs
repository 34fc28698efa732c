//! GroundingVerifier: the release gate for draft answers.
//!
//! A draft is released only when it carries no PHI, no prompt-injection
//! indicators (in the draft or, optionally, the evidence it was built from)
//! and every claim cites a document present in the bundle.
//!
//! The verdict is a strict priority policy, in the same spirit as a
//! block/escalate/proceed synthesizer:
//! 1. `phi_detected`
//! 2. `prompt_injection_detected`
//! 3. `grounding_fail`
//!
//! The first issue present decides the abstention reason.
//!
//! `verify` is a pure function of its input. It reads no clock and no
//! randomness, so identical input yields an identical result.

mod grounding;
mod patterns;
mod redaction;

pub use grounding::{check_claims, GroundingReport};
pub use patterns::{injection_hits, phi_patterns};
pub use redaction::{redact, Redaction, RedactionMode};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::{
    DraftAnswer, EvidenceBundle, IssueKind, PhiCategory, Severity, VerificationIssue,
    VerificationResult, VerificationStatus,
};

/// Verifier knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierConfig {
    #[serde(default)]
    pub redaction: RedactionMode,

    /// Also scan evidence item texts for injected instructions.
    #[serde(default = "default_true")]
    pub scan_evidence_for_injection: bool,
}

fn default_true() -> bool {
    true
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            redaction: RedactionMode::Standard,
            scan_evidence_for_injection: true,
        }
    }
}

/// Decides whether a draft answer may be released.
#[derive(Debug, Clone, Default)]
pub struct GroundingVerifier {
    config: VerifierConfig,
}

impl GroundingVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: VerifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Verify `draft` against the bundle that produced it.
    pub fn verify(&self, draft: &DraftAnswer, bundle: &EvidenceBundle) -> VerificationResult {
        let mode = self.config.redaction;

        // 1. PHI
        let redaction = redact(&draft.text, mode);
        let phi_detected = redaction.detected();

        // 2. Prompt injection
        let injection = self.scan_injection(draft, bundle);
        let injection_detected = !injection.is_empty();

        // 3. Grounding
        let report = check_claims(draft, bundle, mode);

        let mut issues = Vec::new();
        if phi_detected {
            issues.push(VerificationIssue {
                kind: IssueKind::PhiDetected,
                severity: Severity::High,
                description: describe_phi(&redaction),
            });
        }
        if injection_detected {
            issues.push(VerificationIssue {
                kind: IssueKind::PromptInjectionDetected,
                severity: Severity::High,
                description: format!(
                    "Prompt-injection indicators found: {}",
                    injection.iter().cloned().collect::<Vec<_>>().join(", ")
                ),
            });
        }
        if !report.fully_grounded() {
            let severity = if report.grounded == 0 {
                Severity::High
            } else {
                Severity::Medium
            };
            let description = if report.total == 0 {
                "Draft contains no verifiable claims".to_string()
            } else {
                format!(
                    "{} of {} claims lack a citation present in the evidence",
                    report.total - report.grounded,
                    report.total
                )
            };
            issues.push(VerificationIssue {
                kind: IssueKind::GroundingFail,
                severity,
                description,
            });
        }
        issues.sort_by_key(|issue| issue.kind);

        // 4. Verdict
        let passed = issues.is_empty();
        let status = if passed {
            VerificationStatus::Pass
        } else if phi_detected || injection_detected || report.grounded == 0 {
            VerificationStatus::Fail
        } else {
            VerificationStatus::Partial
        };

        // 5. Reason priority
        let abstention_reason = issues.first().map(|issue| issue.kind.abstention_reason());

        tracing::debug!(
            status = status.as_str(),
            grounded = report.grounded,
            total = report.total,
            phi_matches = redaction.total(),
            injection = injection_detected,
            "Draft verified"
        );

        VerificationResult {
            status,
            passed,
            total_claims: report.total,
            grounded_claims: report.grounded,
            ungrounded_claims: report.ungrounded,
            issues,
            phi_redaction_count: redaction.counts,
            prompt_injection_detected: injection_detected,
            redacted_text: redaction.text,
            abstention_reason,
        }
    }

    /// Names of matched patterns with where they were found, sorted.
    fn scan_injection(&self, draft: &DraftAnswer, bundle: &EvidenceBundle) -> BTreeSet<String> {
        let mut hits = BTreeSet::new();

        for name in injection_hits(&draft.text) {
            hits.insert(format!("{} (draft)", name));
        }

        if self.config.scan_evidence_for_injection {
            for item in &bundle.items {
                for name in injection_hits(&item.text) {
                    hits.insert(format!("{} (evidence {})", name, short_hash(&item.doc_hash)));
                }
            }
        }

        hits
    }
}

fn describe_phi(redaction: &Redaction) -> String {
    let categories: Vec<&str> = redaction.counts.keys().map(PhiCategory::as_str).collect();
    format!(
        "Draft contains {} PHI/PII match(es): {}",
        redaction.total(),
        categories.join(", ")
    )
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
