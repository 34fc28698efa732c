//! Detection patterns for PHI/PII and prompt injection.
//!
//! Order matters for PHI: patterns are applied one after another to the
//! progressively redacted text, so more specific shapes (SSN, MRN) run
//! before the looser ones (phone, names) that could otherwise claim their
//! digits or words.

use lazy_static::lazy_static;
use regex::Regex;

use crate::types::PhiCategory;

lazy_static! {
    // =========================================================================
    // PHI / PII — STANDARD
    // =========================================================================

    pub static ref STANDARD_PHI_PATTERNS: Vec<(PhiCategory, Regex)> = vec![
        (PhiCategory::Ssn, Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap()),
        (PhiCategory::Ssn, Regex::new(r"\b\d{3}\.\d{2}\.\d{4}\b").unwrap()),
        (PhiCategory::Mrn, Regex::new(r"(?i)\bMRN[:#\s]*[A-Z0-9]{5,10}\b").unwrap()),
        (PhiCategory::Mrn, Regex::new(r"\b[A-Z]{2}\d{6}\b").unwrap()),
        (PhiCategory::Email, Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").unwrap()),
        (PhiCategory::Phone, Regex::new(
            r"(?:\+1[-.\s]?)?(?:\(\d{3}\)\s?|\b\d{3}[-.\s])\d{3}[-.\s]\d{4}\b"
        ).unwrap()),
        (PhiCategory::Date, Regex::new(r"\b\d{4}-\d{2}-\d{2}\b").unwrap()),
        (PhiCategory::Date, Regex::new(r"\b\d{1,2}/\d{1,2}/\d{4}\b").unwrap()),
        (PhiCategory::Address, Regex::new(
            r"\b\d{1,5}\s+(?:[A-Z][a-z]+\s+){1,3}(?:Street|St|Avenue|Ave|Road|Rd|Boulevard|Blvd|Lane|Ln|Drive|Dr|Court|Ct|Way)\b\.?"
        ).unwrap()),
        (PhiCategory::Name, Regex::new(
            r"\b(?:Mr|Mrs|Ms|Miss|Dr)\.?\s+[A-Z][a-z]+(?:\s+[A-Z][a-z]+)?\b"
        ).unwrap()),
        (PhiCategory::Name, Regex::new(
            r"\b(?i:patient|pt\.?)\s+[A-Z][a-z]+\s+[A-Z][a-z]+\b"
        ).unwrap()),
    ];

    // =========================================================================
    // PHI / PII — AGGRESSIVE ADDITIONS (more false positives)
    // =========================================================================

    pub static ref AGGRESSIVE_PHI_PATTERNS: Vec<(PhiCategory, Regex)> = vec![
        (PhiCategory::Id, Regex::new(r"\b\d{10}\b").unwrap()),
        (PhiCategory::Address, Regex::new(r"\b\d{5}-\d{4}\b").unwrap()),
        (PhiCategory::Date, Regex::new(
            r"(?i)\b(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Sept|Oct|Nov|Dec)[a-z]*\.?\s+\d{1,2},\s+\d{4}\b"
        ).unwrap()),
        (PhiCategory::Name, Regex::new(r"\b[A-Z][a-z]+\s+[A-Z][a-z]+\b").unwrap()),
    ];

    // =========================================================================
    // PROMPT INJECTION
    // =========================================================================

    pub static ref INJECTION_PATTERNS: Vec<(&'static str, Regex)> = vec![
        ("override instructions", Regex::new(
            r"(?i)\b(?:ignore|disregard|forget|override)\s+(?:all\s+|any\s+)?(?:of\s+)?(?:the\s+|your\s+)?(?:previous|prior|above|earlier|preceding|system)\s+(?:instructions?|prompts?|rules|constraints|directions)"
        ).unwrap()),
        ("forget context", Regex::new(
            r"(?i)\bforget\s+(?:everything|all\s+(?:previous|prior|above))\b"
        ).unwrap()),
        ("reveal internals", Regex::new(
            r"(?i)\b(?:reveal|show|print|repeat|disclose|output)\s+(?:me\s+)?(?:your|the)\s+(?:system\s+prompt|hidden\s+instructions|initial\s+prompt|internal\s+(?:state|instructions|configuration))"
        ).unwrap()),
        ("role marker", Regex::new(r"(?im)^\s*(?:system|assistant|developer)\s*:").unwrap()),
        ("chat template token", Regex::new(r"<\|?(?:im_start|im_end|system|endoftext)\|?>").unwrap()),
        ("role impersonation", Regex::new(
            r"(?i)\b(?:you\s+are\s+now|act\s+as|pretend\s+to\s+be)\s+(?:the\s+|a\s+|an\s+)?(?:system|developer|administrator|admin|unrestricted)\b"
        ).unwrap()),
        ("jailbreak", Regex::new(r"(?i)\b(?:jailbreak|DAN\s+mode|developer\s+mode\s+enabled)\b").unwrap()),
    ];
}

/// PHI patterns in application order for the given mode.
pub fn phi_patterns(aggressive: bool) -> impl Iterator<Item = &'static (PhiCategory, Regex)> {
    let extra = if aggressive { AGGRESSIVE_PHI_PATTERNS.len() } else { 0 };
    STANDARD_PHI_PATTERNS
        .iter()
        .chain(AGGRESSIVE_PHI_PATTERNS.iter().take(extra))
}

/// Names of the injection patterns that match `text`.
pub fn injection_hits(text: &str) -> Vec<&'static str> {
    INJECTION_PATTERNS
        .iter()
        .filter(|(_, regex)| regex.is_match(text))
        .map(|(name, _)| *name)
        .collect()
}
