//! Keyword-based intake classifier.
//!
//! Rule-based stand-in for a model-backed classifier: request type by
//! keyword score, risk by keyword tier, constraints by pattern.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;

use caduceus_core::{Constraints, RequestPlan, RequestType, RiskLabel, Scope, Tool};

use super::traits::IntakeClassifier;
use crate::error::CollaboratorError;

/// Request-type keywords, in tie-break order.
const TYPE_KEYWORDS: &[(RequestType, &[&str])] = &[
    (
        RequestType::PolicyLookup,
        &[
            "policy", "protocol", "procedure", "guideline", "standard", "what is", "how to",
            "what are", "show me",
        ],
    ),
    (
        RequestType::SummarizeGuideline,
        &["summarize", "summary", "overview", "brief", "outline"],
    ),
    (
        RequestType::CompareProtocols,
        &[
            "compare", "difference", "versus", " vs ", "contrast", "which is better",
        ],
    ),
    (
        RequestType::ExplainPolicy,
        &[
            "explain", "describe", "walk through", "step by step", "how does", "why",
            "what does",
        ],
    ),
];

const HIGH_RISK: &[&str] = &[
    "diagnosis", "diagnose", "treat", "prescribe", "medication", "patient", "cure", "therapy",
];

const MEDIUM_RISK: &[&str] = &["recommend", "suggest", "advise", "guidance", "best practice"];

const LOW_RISK: &[&str] = &[
    "policy", "procedure", "protocol", "guideline", "standard", "documentation", "process",
];

lazy_static! {
    static ref DEPARTMENT_ACRONYM: Regex = Regex::new(r"\b(ER|ED|ICU|OR)\b").unwrap();
    static ref DEPARTMENT_NAME: Regex =
        Regex::new(r"(?i)\b(emergency (?:room|department)|intensive care unit|operating room)\b")
            .unwrap();
    static ref JURISDICTION: Regex =
        Regex::new(r"\bin\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+)?)\b").unwrap();
    static ref TIMEFRAME_RELATIVE: Regex =
        Regex::new(r"(?i)\b(?:in|within|by)\s+\d+\s+(?:days?|weeks?|months?|years?)\b").unwrap();
    static ref TIMEFRAME_DATE: Regex =
        Regex::new(r"(?i)\b(?:since|after|before)\s+\d{4}-\d{2}-\d{2}\b").unwrap();
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordIntakeClassifier;

impl KeywordIntakeClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous classification; the trait impl wraps this.
    pub fn plan(&self, request_text: &str) -> RequestPlan {
        let lower = format!(" {} ", request_text.to_lowercase());

        let request_type = classify_type(&lower);
        let risk_label = assess_risk(&lower);
        let constraints = extract_constraints(request_text);

        // High-risk requests we cannot even categorize are individual
        // clinical decisions, not policy questions.
        let scope = if risk_label == RiskLabel::High && request_type == RequestType::Unknown {
            Scope::Unsupported
        } else {
            Scope::Supported
        };

        let mut confidence = 0.5;
        if request_type != RequestType::Unknown {
            confidence += 0.2;
        }
        if [HIGH_RISK, MEDIUM_RISK, LOW_RISK]
            .iter()
            .any(|tier| count_hits(&lower, tier) > 0)
        {
            confidence += 0.2;
        }
        if !constraints.is_empty() {
            confidence += 0.1;
        }

        let mut plan = RequestPlan::new(request_type, risk_label, scope)
            .with_constraints(constraints)
            .with_confidence(confidence);

        if risk_label == RiskLabel::High {
            plan = plan.with_tool(Tool::RedactPhi).with_tool(Tool::VerifyGrounding);
        }
        if request_type == RequestType::CompareProtocols {
            plan = plan.with_tool(Tool::CompareDocuments);
        }

        plan
    }
}

#[async_trait]
impl IntakeClassifier for KeywordIntakeClassifier {
    async fn classify(&self, request_text: &str) -> Result<RequestPlan, CollaboratorError> {
        Ok(self.plan(request_text))
    }
}

fn count_hits(lower: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|k| lower.contains(*k)).count()
}

fn classify_type(lower: &str) -> RequestType {
    let mut best = (RequestType::Unknown, 0);
    for (request_type, keywords) in TYPE_KEYWORDS {
        let score = count_hits(lower, keywords);
        if score > best.1 {
            best = (*request_type, score);
        }
    }
    best.0
}

fn assess_risk(lower: &str) -> RiskLabel {
    if count_hits(lower, HIGH_RISK) > 0 {
        RiskLabel::High
    } else if count_hits(lower, MEDIUM_RISK) > 0 {
        RiskLabel::Medium
    } else {
        RiskLabel::Low
    }
}

fn extract_constraints(text: &str) -> Constraints {
    let department = DEPARTMENT_ACRONYM
        .captures(text)
        .map(|c| c[1].to_string())
        .or_else(|| {
            DEPARTMENT_NAME.captures(text).map(|c| {
                match c[1].to_lowercase().as_str() {
                    "intensive care unit" => "ICU",
                    "operating room" => "OR",
                    "emergency room" => "ER",
                    _ => "ED",
                }
                .to_string()
            })
        });

    let jurisdiction = JURISDICTION
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .find(|place| !DEPARTMENT_NAME.is_match(place));

    let timeframe = TIMEFRAME_RELATIVE
        .find(text)
        .or_else(|| TIMEFRAME_DATE.find(text))
        .map(|m| m.as_str().to_string());

    Constraints {
        department,
        jurisdiction,
        timeframe,
    }
}
