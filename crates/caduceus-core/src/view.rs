//! Caller-facing projection of a run.
//!
//! Completed runs expose the answer. Abstained runs expose a templated
//! refusal and its reason, never the rejected draft. Failed runs expose a
//! generic message and the failure kind only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::validate_run_view;
use crate::types::{AbstentionReason, FailureKind, RequestType, RiskLabel, Run, RunStatus, Step};
use crate::CoreError;

/// Shown for every failed run regardless of cause.
pub const GENERIC_FAILURE_MESSAGE: &str =
    "The request could not be completed. Please try again later.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<Step>,
    pub steps_completed: u8,
    pub total_steps: u8,
    pub fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewError {
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunView {
    pub id: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_type: Option<RequestType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_label: Option<RiskLabel>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: Progress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refusal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abstention_reason: Option<AbstentionReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ViewError>,
}

impl RunView {
    pub fn to_json(&self) -> Result<serde_json::Value, CoreError> {
        serde_json::to_value(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    /// Check the serialized view against the embedded schema.
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_run_view(&self.to_json()?)
    }
}

impl From<&Run> for RunView {
    fn from(run: &Run) -> Self {
        let mut view = RunView {
            id: run.id.clone(),
            status: run.status,
            user_id: run.user_id.clone(),
            request_type: run.request_type,
            risk_label: run.risk_label,
            created_at: run.created_at,
            started_at: run.started_at,
            completed_at: run.completed_at,
            progress: Progress {
                current_step: run.current_step,
                steps_completed: run.steps_completed,
                total_steps: run.total_steps,
                fraction: run.progress(),
            },
            answer: None,
            refusal: None,
            abstention_reason: None,
            error: None,
        };

        match run.status {
            RunStatus::Completed => view.answer = run.final_answer.clone(),
            RunStatus::Abstained => {
                let reason = run.abstention_reason.unwrap_or(AbstentionReason::GroundingFail);
                view.refusal = Some(reason.refusal_message().to_string());
                view.abstention_reason = Some(reason);
            }
            RunStatus::Failed => {
                view.error = Some(ViewError {
                    kind: run
                        .failure
                        .as_ref()
                        .map(|f| f.kind)
                        .unwrap_or(FailureKind::CollaboratorError),
                    message: GENERIC_FAILURE_MESSAGE.to_string(),
                });
            }
            _ => {}
        }

        view
    }
}
