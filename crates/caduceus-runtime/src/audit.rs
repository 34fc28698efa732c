//! Audit events and sinks.
//!
//! Sinks receive hashes, counts, statuses and redacted text only. Nothing
//! recorded here can carry raw request, evidence or draft text.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use caduceus_core::{PhiCategory, RunStatus, VerificationResult, VerificationStatus};

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub run_id: String,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: AuditEventKind,
}

impl AuditEvent {
    pub fn new(run_id: impl Into<String>, kind: AuditEventKind) -> Self {
        Self {
            run_id: run_id.into(),
            at: Utc::now(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEventKind {
    RunCreated {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        request_chars: usize,
        request_redactions: usize,
    },
    StatusTransition {
        from: RunStatus,
        to: RunStatus,
    },
    /// Inputs and outputs are counts and hashes.
    ToolCall {
        name: String,
        inputs: serde_json::Value,
        outputs: serde_json::Value,
        duration_ms: u64,
        success: bool,
    },
    EvidenceRetrieval {
        query_hash: String,
        backends: Vec<String>,
        doc_hashes: Vec<String>,
        scores: Vec<f64>,
        agreement_score: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selected_backend: Option<String>,
    },
    Citation {
        claim_position: usize,
        doc_hash: String,
    },
    VerificationRecorded {
        status: VerificationStatus,
        passed: bool,
        grounded_claims: usize,
        total_claims: usize,
        phi_redaction_count: BTreeMap<PhiCategory, usize>,
        prompt_injection_detected: bool,
    },
}

impl AuditEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunCreated { .. } => "run_created",
            Self::StatusTransition { .. } => "status_transition",
            Self::ToolCall { .. } => "tool_call",
            Self::EvidenceRetrieval { .. } => "evidence_retrieval",
            Self::Citation { .. } => "citation",
            Self::VerificationRecorded { .. } => "verification_recorded",
        }
    }

    pub fn verification(result: &VerificationResult) -> Self {
        Self::VerificationRecorded {
            status: result.status,
            passed: result.passed,
            grounded_claims: result.grounded_claims,
            total_claims: result.total_claims,
            phi_redaction_count: result.phi_redaction_count.clone(),
            prompt_injection_detected: result.prompt_injection_detected,
        }
    }
}

/// Fire-and-forget persistence of audit events.
///
/// Implementations must not block for long or fail the caller; a sink that
/// cannot persist should log and drop.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits each event as a structured `tracing` event on `caduceus::audit`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        match serde_json::to_string(&event.kind) {
            Ok(payload) => tracing::info!(
                target: "caduceus::audit",
                run_id = %event.run_id,
                event = event.kind.name(),
                at = %event.at.to_rfc3339(),
                payload = %payload,
                "audit"
            ),
            Err(e) => tracing::warn!(
                target: "caduceus::audit",
                run_id = %event.run_id,
                event = event.kind.name(),
                error = %e,
                "Failed to serialize audit event"
            ),
        }
    }
}

/// Collects events in memory, for tests and offline inspection.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn for_run(&self, run_id: &str) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect()
    }

    /// Status transitions recorded for a run, in order.
    pub fn transitions(&self, run_id: &str) -> Vec<(RunStatus, RunStatus)> {
        self.for_run(run_id)
            .into_iter()
            .filter_map(|e| match e.kind {
                AuditEventKind::StatusTransition { from, to } => Some((from, to)),
                _ => None,
            })
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}
