//! Deterministic evidence retrieval math.
//!
//! The async fan-out lives in `caduceus-runtime`; this module owns what
//! happens once every backend call has settled:
//! - input validation (fail fast before any side effect)
//! - merging per-backend result lists into one ranked list
//! - inter-backend agreement
//! - canonical backend selection from historical metrics

mod merge;
mod selection;

pub use merge::{agreement_score, merge, passthrough, BackendResults};
pub use selection::{select_backend, BackendMetrics};

use crate::CoreError;

/// Reject retrieval input that can never produce a meaningful bundle.
///
/// An empty query is an error rather than an empty bundle so that "no
/// evidence" is never confused with "not yet searched".
pub fn validate_request(query: &str, top_k: usize) -> Result<(), CoreError> {
    if query.trim().is_empty() {
        return Err(CoreError::InvalidInput("query must not be empty".to_string()));
    }
    if top_k == 0 {
        return Err(CoreError::InvalidInput("top_k must be positive".to_string()));
    }
    Ok(())
}
