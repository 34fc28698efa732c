//! Claim-level grounding against an evidence bundle.

use crate::types::{DraftAnswer, EvidenceBundle, UngroundedClaim};

use super::redaction::{redact, RedactionMode};

/// Outcome of checking every claim in a draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroundingReport {
    pub total: usize,
    pub grounded: usize,
    pub ungrounded: Vec<UngroundedClaim>,
}

impl GroundingReport {
    /// Every claim resolved, and there was at least one claim.
    pub fn fully_grounded(&self) -> bool {
        self.total > 0 && self.grounded == self.total
    }
}

/// A claim is grounded iff it has a citation whose hash is in the bundle.
///
/// Ungrounded claim text is redacted with `mode` before it is reported.
pub fn check_claims(
    draft: &DraftAnswer,
    bundle: &EvidenceBundle,
    mode: RedactionMode,
) -> GroundingReport {
    let mut grounded = 0;
    let mut ungrounded = Vec::new();

    for claim in &draft.claims {
        let cited = draft.citations.get(&claim.position);
        match cited {
            Some(hash) if bundle.contains_hash(hash) => grounded += 1,
            _ => ungrounded.push(UngroundedClaim {
                text: redact(&claim.text, mode).text,
                position: claim.position,
                cited_hash: cited.cloned(),
            }),
        }
    }

    GroundingReport {
        total: draft.claims.len(),
        grounded,
        ungrounded,
    }
}
