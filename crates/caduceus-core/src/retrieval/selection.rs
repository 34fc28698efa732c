//! Canonical backend selection from externally supplied metrics.

use serde::{Deserialize, Serialize};

/// Historical performance of one backend for one query type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackendMetrics {
    pub mean_score: f64,
    pub p95_latency_ms: f64,
}

impl BackendMetrics {
    pub fn new(mean_score: f64, p95_latency_ms: f64) -> Self {
        Self {
            mean_score,
            p95_latency_ms,
        }
    }
}

/// Compare at nanounit precision so float noise never decides a tie.
fn quantize(value: f64) -> i64 {
    (value * 1e9).round() as i64
}

/// Pick the single backend downstream systems should treat as canonical.
///
/// Priority: highest mean relevance, then lowest p95 latency, then the
/// lexicographically smallest identifier. Returns `None` with no candidates.
pub fn select_backend<'a, I>(candidates: I) -> Option<String>
where
    I: IntoIterator<Item = (&'a str, BackendMetrics)>,
{
    candidates
        .into_iter()
        .min_by(|(id_a, a), (id_b, b)| {
            quantize(b.mean_score)
                .cmp(&quantize(a.mean_score))
                .then_with(|| quantize(a.p95_latency_ms).cmp(&quantize(b.p95_latency_ms)))
                .then_with(|| id_a.cmp(id_b))
        })
        .map(|(id, _)| id.to_string())
}
