//! Core data model shared by the retriever, the verifier and the run machine.
//!
//! None of these types hold raw patient-identifying text once they leave the
//! step that produced them: request text on a [`Run`] is stored redacted,
//! verification output carries redacted claim text, and audit-facing data is
//! limited to hashes and counts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Number of pipeline steps in every run.
pub const TOTAL_STEPS: u8 = 4;

/// Opaque, free-form metadata attached to an evidence item.
///
/// A `BTreeMap` keeps iteration (and therefore serialization) order stable.
pub type Metadata = BTreeMap<String, String>;

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Intake,
    Retrieval,
    Synthesis,
    Verification,
    Completed,
    Abstained,
    Failed,
}

impl RunStatus {
    /// Whether no further transition can happen from this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Abstained | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Intake => "intake",
            Self::Retrieval => "retrieval",
            Self::Synthesis => "synthesis",
            Self::Verification => "verification",
            Self::Completed => "completed",
            Self::Abstained => "abstained",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four pipeline steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Intake,
    Retrieval,
    Synthesis,
    Verification,
}

impl Step {
    pub const ALL: [Step; 4] = [
        Step::Intake,
        Step::Retrieval,
        Step::Synthesis,
        Step::Verification,
    ];

    /// The run status shown while this step is in flight.
    pub fn status(&self) -> RunStatus {
        match self {
            Self::Intake => RunStatus::Intake,
            Self::Retrieval => RunStatus::Retrieval,
            Self::Synthesis => RunStatus::Synthesis,
            Self::Verification => RunStatus::Verification,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Retrieval => "retrieval",
            Self::Synthesis => "synthesis",
            Self::Verification => "verification",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk classification assigned by intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLabel {
    Low,
    Medium,
    High,
}

impl RiskLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// What kind of question the request is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    PolicyLookup,
    SummarizeGuideline,
    CompareProtocols,
    ExplainPolicy,
    Unknown,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PolicyLookup => "policy_lookup",
            Self::SummarizeGuideline => "summarize_guideline",
            Self::CompareProtocols => "compare_protocols",
            Self::ExplainPolicy => "explain_policy",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the request falls inside what the assistant may answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Supported,
    Unsupported,
}

/// Tools a plan asks the pipeline to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    RetrieveEvidence,
    RedactPhi,
    VerifyGrounding,
    CompareDocuments,
}

impl Tool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetrieveEvidence => "retrieve_evidence",
            Self::RedactPhi => "redact_phi",
            Self::VerifyGrounding => "verify_grounding",
            Self::CompareDocuments => "compare_documents",
        }
    }
}

/// Constraints extracted from a request. The key set is closed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,
}

impl Constraints {
    pub fn is_empty(&self) -> bool {
        self.department.is_none() && self.jurisdiction.is_none() && self.timeframe.is_none()
    }
}

/// Output of the intake step. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestPlan {
    pub request_type: RequestType,
    pub risk_label: RiskLabel,
    pub scope: Scope,
    pub constraints: Constraints,
    required_tools: Vec<Tool>,
    pub confidence: f64,
}

impl RequestPlan {
    pub fn new(request_type: RequestType, risk_label: RiskLabel, scope: Scope) -> Self {
        Self {
            request_type,
            risk_label,
            scope,
            constraints: Constraints::default(),
            required_tools: vec![Tool::RetrieveEvidence],
            confidence: 0.5,
        }
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Append a tool, keeping first-insertion order and dropping duplicates.
    pub fn with_tool(mut self, tool: Tool) -> Self {
        if !self.required_tools.contains(&tool) {
            self.required_tools.push(tool);
        }
        self
    }

    pub fn required_tools(&self) -> &[Tool] {
        &self.required_tools
    }

    /// High risk combined with an unsupported scope ends the run at intake.
    pub fn must_abstain(&self) -> bool {
        self.risk_label == RiskLabel::High && self.scope == Scope::Unsupported
    }

    /// Retrieval filters implied by the plan's constraints.
    pub fn filters(&self) -> RetrievalFilters {
        RetrievalFilters {
            department: self.constraints.department.clone(),
            jurisdiction: self.constraints.jurisdiction.clone(),
            document_type: None,
        }
    }
}

/// Metadata filters accepted at the retrieval boundary.
///
/// Each populated field must equal (case-insensitively) the item metadata
/// entry of the same name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
}

impl RetrievalFilters {
    pub fn is_empty(&self) -> bool {
        self.department.is_none() && self.jurisdiction.is_none() && self.document_type.is_none()
    }

    /// Clear every populated field `keep` rejects. Returns how many were
    /// cleared.
    pub fn retain(&mut self, keep: impl Fn(&str) -> bool) -> usize {
        let mut cleared = 0;
        for field in [&mut self.department, &mut self.jurisdiction, &mut self.document_type] {
            if field.as_deref().is_some_and(|value| !keep(value)) {
                *field = None;
                cleared += 1;
            }
        }
        cleared
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        let pairs = [
            ("department", &self.department),
            ("jurisdiction", &self.jurisdiction),
            ("document_type", &self.document_type),
        ];

        pairs.iter().all(|(key, wanted)| match wanted {
            None => true,
            Some(wanted) => metadata
                .get(*key)
                .map(|v| v.eq_ignore_ascii_case(wanted))
                .unwrap_or(false),
        })
    }
}

/// A retrieved policy fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub document_id: String,
    pub text: String,
    /// Content-integrity hash of the fragment; never raw text.
    pub doc_hash: String,
    /// Relevance in `[0, 1]`, higher is better.
    pub score: f64,
    pub backend: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// How a bundle was assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    SingleBackend,
    MultiBackend,
}

/// Ranked, immutable result of one retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    pub query: String,
    /// Score-descending.
    pub items: Vec<EvidenceItem>,
    pub backends_queried: BTreeSet<String>,
    pub agreement_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_backend: Option<String>,
    pub mode: RetrievalMode,
}

impl EvidenceBundle {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains_hash(&self, doc_hash: &str) -> bool {
        self.items.iter().any(|item| item.doc_hash == doc_hash)
    }

    pub fn doc_hashes(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.doc_hash.as_str()).collect()
    }

    pub fn scores(&self) -> Vec<f64> {
        self.items.iter().map(|item| item.score).collect()
    }
}

/// One factual statement inside a draft answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub text: String,
    pub position: usize,
}

/// Output of synthesis; input to verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftAnswer {
    pub text: String,
    #[serde(default)]
    pub claims: Vec<Claim>,
    /// Claim position -> cited doc hash.
    #[serde(default)]
    pub citations: BTreeMap<usize, String>,
}

impl DraftAnswer {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            claims: Vec::new(),
            citations: BTreeMap::new(),
        }
    }

    /// Add a claim at the next position, optionally citing a doc hash.
    pub fn claim(mut self, text: impl Into<String>, citation: Option<&str>) -> Self {
        let position = self.claims.len();
        self.claims.push(Claim {
            text: text.into(),
            position,
        });
        if let Some(hash) = citation {
            self.citations.insert(position, hash.to_string());
        }
        self
    }
}

/// PHI/PII categories the redactor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhiCategory {
    Ssn,
    Mrn,
    Email,
    Phone,
    Date,
    Address,
    Name,
    Id,
}

impl PhiCategory {
    pub fn placeholder(&self) -> &'static str {
        match self {
            Self::Ssn => "[SSN]",
            Self::Mrn => "[MRN]",
            Self::Email => "[EMAIL]",
            Self::Phone => "[PHONE]",
            Self::Date => "[DATE]",
            Self::Address => "[ADDRESS]",
            Self::Name => "[NAME]",
            Self::Id => "[ID]",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ssn => "ssn",
            Self::Mrn => "mrn",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Date => "date",
            Self::Address => "address",
            Self::Name => "name",
            Self::Id => "id",
        }
    }
}

/// Kind of problem the verifier found.
///
/// Declaration order is abstention priority: earlier wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    PhiDetected,
    PromptInjectionDetected,
    GroundingFail,
}

impl IssueKind {
    pub fn abstention_reason(&self) -> AbstentionReason {
        match self {
            Self::PhiDetected => AbstentionReason::PhiDetected,
            Self::PromptInjectionDetected => AbstentionReason::PromptInjectionDetected,
            Self::GroundingFail => AbstentionReason::GroundingFail,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationIssue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pass,
    Fail,
    Partial,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Partial => "partial",
        }
    }
}

/// A claim that could not be traced to the bundle. Text is redacted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UngroundedClaim {
    pub text: String,
    pub position: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cited_hash: Option<String>,
}

/// Verdict on one draft. Identical inputs produce identical results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub status: VerificationStatus,
    pub passed: bool,
    pub total_claims: usize,
    pub grounded_claims: usize,
    pub ungrounded_claims: Vec<UngroundedClaim>,
    pub issues: Vec<VerificationIssue>,
    pub phi_redaction_count: BTreeMap<PhiCategory, usize>,
    pub prompt_injection_detected: bool,
    /// The draft after PHI redaction.
    pub redacted_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abstention_reason: Option<AbstentionReason>,
}

impl VerificationResult {
    pub fn phi_detected(&self) -> bool {
        self.phi_redaction_count.values().any(|count| *count > 0)
    }

    pub fn total_redactions(&self) -> usize {
        self.phi_redaction_count.values().sum()
    }
}

/// Why a run declined to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbstentionReason {
    UnsafeContent,
    PhiDetected,
    PromptInjectionDetected,
    GroundingFail,
}

impl AbstentionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnsafeContent => "unsafe_content",
            Self::PhiDetected => "phi_detected",
            Self::PromptInjectionDetected => "prompt_injection_detected",
            Self::GroundingFail => "grounding_fail",
        }
    }

    /// Fixed user-facing refusal. The rejected draft is never shown.
    pub fn refusal_message(&self) -> &'static str {
        match self {
            Self::UnsafeContent => {
                "This request asks for individual clinical decision-making, which is outside \
                 what this assistant can answer. Please consult the responsible clinician."
            }
            Self::PhiDetected => {
                "An answer could not be released because it may contain protected health \
                 information."
            }
            Self::PromptInjectionDetected => {
                "An answer could not be released because the supporting material contained \
                 instructions that could not be trusted."
            }
            Self::GroundingFail => {
                "An answer could not be released because it could not be fully supported by \
                 the available policy documents."
            }
        }
    }
}

impl fmt::Display for AbstentionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a run-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidInput,
    CollaboratorTimeout,
    CollaboratorError,
    AllBackendsUnavailable,
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::CollaboratorTimeout => "collaborator_timeout",
            Self::CollaboratorError => "collaborator_error",
            Self::AllBackendsUnavailable => "all_backends_unavailable",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Sanitized failure record: names the failing step and error kind only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: FailureKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<Step>,
    pub message: String,
}

/// One end-to-end execution of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub status: RunStatus,
    /// Request text after PHI redaction.
    pub request_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_type: Option<RequestType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_label: Option<RiskLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abstention_reason: Option<AbstentionReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Most recently committed step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<Step>,
    pub steps_completed: u8,
    pub total_steps: u8,
}

impl Run {
    pub fn new(id: impl Into<String>, redacted_request: impl Into<String>, user_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            status: RunStatus::Pending,
            request_text: redacted_request.into(),
            user_id,
            request_type: None,
            risk_label: None,
            final_answer: None,
            abstention_reason: None,
            failure: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            current_step: None,
            steps_completed: 0,
            total_steps: TOTAL_STEPS,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Fraction of steps committed, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        f64::from(self.steps_completed) / f64::from(self.total_steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Abstained.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Verification.is_terminal());
        assert!(!RunStatus::Pending.is_terminal());
    }

    #[test]
    fn test_plan_tools_are_an_ordered_set() {
        let plan = RequestPlan::new(RequestType::PolicyLookup, RiskLabel::High, Scope::Supported)
            .with_tool(Tool::RedactPhi)
            .with_tool(Tool::RetrieveEvidence)
            .with_tool(Tool::VerifyGrounding)
            .with_tool(Tool::RedactPhi);

        assert_eq!(
            plan.required_tools(),
            &[Tool::RetrieveEvidence, Tool::RedactPhi, Tool::VerifyGrounding]
        );
    }

    #[test]
    fn test_must_abstain_requires_high_and_unsupported() {
        let high_unsupported =
            RequestPlan::new(RequestType::Unknown, RiskLabel::High, Scope::Unsupported);
        let high_supported =
            RequestPlan::new(RequestType::PolicyLookup, RiskLabel::High, Scope::Supported);
        let low_unsupported =
            RequestPlan::new(RequestType::Unknown, RiskLabel::Low, Scope::Unsupported);

        assert!(high_unsupported.must_abstain());
        assert!(!high_supported.must_abstain());
        assert!(!low_unsupported.must_abstain());
    }

    #[test]
    fn test_filters_match_metadata_case_insensitively() {
        let filters = RetrievalFilters {
            department: Some("ICU".to_string()),
            ..Default::default()
        };

        let mut metadata = Metadata::new();
        metadata.insert("department".to_string(), "icu".to_string());
        assert!(filters.matches(&metadata));

        metadata.insert("department".to_string(), "ED".to_string());
        assert!(!filters.matches(&metadata));

        assert!(!filters.matches(&Metadata::new()));
        assert!(RetrievalFilters::default().matches(&Metadata::new()));
    }

    #[test]
    fn test_filters_retain_clears_rejected_values() {
        let mut filters = RetrievalFilters {
            department: Some("ICU".to_string()),
            jurisdiction: Some("Mrs Garcia".to_string()),
            document_type: None,
        };

        let cleared = filters.retain(|value| !value.starts_with("Mrs"));
        assert_eq!(cleared, 1);
        assert_eq!(filters.department.as_deref(), Some("ICU"));
        assert!(filters.jurisdiction.is_none());
    }

    #[test]
    fn test_issue_kind_order_is_abstention_priority() {
        let mut kinds = vec![
            IssueKind::GroundingFail,
            IssueKind::PhiDetected,
            IssueKind::PromptInjectionDetected,
        ];
        kinds.sort();
        assert_eq!(kinds[0], IssueKind::PhiDetected);
        assert_eq!(kinds[1], IssueKind::PromptInjectionDetected);
        assert_eq!(kinds[2], IssueKind::GroundingFail);
    }

    #[test]
    fn test_draft_builder_assigns_positions() {
        let draft = DraftAnswer::new("text")
            .claim("first", Some("h1"))
            .claim("second", None);

        assert_eq!(draft.claims[1].position, 1);
        assert_eq!(draft.citations.get(&0).map(String::as_str), Some("h1"));
        assert!(!draft.citations.contains_key(&1));
    }

    #[test]
    fn test_new_run_is_pending_with_four_steps() {
        let run = Run::new("r1", "What is the sepsis policy?", None);
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.total_steps, TOTAL_STEPS);
        assert_eq!(run.progress(), 0.0);
    }
}
