//! PHI/PII redaction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::patterns::phi_patterns;
use crate::types::PhiCategory;

/// How wide a net the redactor casts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedactionMode {
    #[default]
    Standard,
    /// Standard patterns plus looser ones (bare name pairs, 10-digit ids,
    /// zip+4, spelled-out dates).
    Aggressive,
}

/// Redacted text plus per-category match counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redaction {
    pub text: String,
    pub counts: BTreeMap<PhiCategory, usize>,
}

impl Redaction {
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn detected(&self) -> bool {
        self.total() > 0
    }
}

/// Replace every PHI match with its category placeholder.
///
/// Categories with zero matches are not present in `counts`.
pub fn redact(text: &str, mode: RedactionMode) -> Redaction {
    let aggressive = mode == RedactionMode::Aggressive;
    let mut redacted = text.to_string();
    let mut counts: BTreeMap<PhiCategory, usize> = BTreeMap::new();

    for (category, regex) in phi_patterns(aggressive) {
        let found = regex.find_iter(&redacted).count();
        if found == 0 {
            continue;
        }
        *counts.entry(*category).or_insert(0) += found;
        redacted = regex
            .replace_all(&redacted, category.placeholder())
            .into_owned();
    }

    Redaction {
        text: redacted,
        counts,
    }
}
