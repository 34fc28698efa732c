//! # caduceus-core
//!
//! Deterministic building blocks of the Caduceus clinical-operations
//! pipeline.
//!
//! This crate answers, without any I/O:
//! - How do several backends' results become one ranked evidence bundle?
//! - Which backend is canonical for a query type?
//! - May this draft answer be released?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same input always produces same output
//! 2. **No raw PHI in outputs**: only hashes, counts and redacted text leave the verifier
//! 3. **Strict release gate**: a single ungrounded claim blocks an answer
//! 4. **Parallel-safe**: everything here is a pure function, safe across runs
//!
//! ## Example
//!
//! ```rust,ignore
//! use caduceus_core::{DraftAnswer, GroundingVerifier};
//!
//! let draft = DraftAnswer::new("Give antibiotics within 1 hour.")
//!     .claim("Give antibiotics within 1 hour.", Some(&bundle.items[0].doc_hash));
//! let result = GroundingVerifier::new().verify(&draft, &bundle);
//!
//! match result.abstention_reason {
//!     None => println!("RELEASE"),
//!     Some(reason) => println!("ABSTAIN: {}", reason),
//! }
//! ```

pub mod hashing;
pub mod retrieval;
pub mod schema;
pub mod types;
pub mod verifier;
pub mod view;

pub use hashing::doc_hash;
pub use retrieval::{
    agreement_score, merge, passthrough, select_backend, validate_request, BackendMetrics,
    BackendResults,
};
pub use schema::validate_run_view;
pub use types::{
    AbstentionReason, Claim, Constraints, DraftAnswer, EvidenceBundle, EvidenceItem,
    FailureKind, IssueKind, Metadata, PhiCategory, RequestPlan, RequestType, RetrievalFilters,
    RetrievalMode, RiskLabel, Run, RunFailure, RunStatus, Scope, Severity, Step, Tool,
    UngroundedClaim, VerificationIssue, VerificationResult, VerificationStatus, TOTAL_STEPS,
};
pub use verifier::{redact, GroundingVerifier, Redaction, RedactionMode, VerifierConfig};
pub use view::{RunView, GENERIC_FAILURE_MESSAGE};

use thiserror::Error;

/// Errors raised by the deterministic core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Failed to load schema: {0}")]
    SchemaLoad(String),

    #[error("Schema validation failed: {}", .0.join("; "))]
    SchemaViolation(Vec<String>),

    #[error("Serialization failed: {0}")]
    Serialization(String),
}
