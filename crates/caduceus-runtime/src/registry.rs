//! RunRegistry: the caller-facing `start` / `get_state` / `cancel` surface.
//!
//! The map lock is held only to find a run; each run has its own lock, so a
//! busy run never blocks queries on another. Terminal runs stay queryable
//! until removed with [`RunRegistry::remove`] or
//! [`RunRegistry::prune_terminal`].

use chrono::Utc;
use parking_lot::RwLock;
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use caduceus_core::{redact, Run, RunView};

use crate::audit::{AuditEvent, AuditEventKind};
use crate::error::PipelineError;
use crate::machine::{Pipeline, RunStateMachine};

#[derive(Clone)]
struct RunEntry {
    run: Arc<RwLock<Run>>,
    cancel: Arc<AtomicBool>,
}

pub struct RunRegistry {
    runs: RwLock<HashMap<String, RunEntry>>,
    pipeline: Arc<Pipeline>,
}

impl RunRegistry {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            pipeline: Arc::new(pipeline),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Register a run and dispatch it onto the tokio runtime.
    ///
    /// Returns as soon as the run is registered. Must be called from within
    /// a tokio runtime.
    pub fn start(&self, request_text: &str, user_id: Option<String>) -> Result<String, PipelineError> {
        if request_text.trim().is_empty() {
            return Err(PipelineError::InvalidInput(
                "request text must not be empty".to_string(),
            ));
        }

        let id = Uuid::new_v4().to_string();
        let redaction = redact(request_text, self.pipeline.config().verifier.redaction_mode());

        let entry = RunEntry {
            run: Arc::new(RwLock::new(Run::new(&id, redaction.text.as_str(), user_id.clone()))),
            cancel: Arc::new(AtomicBool::new(false)),
        };
        self.runs.write().insert(id.clone(), entry.clone());

        self.pipeline.audit().record(AuditEvent::new(
            &id,
            AuditEventKind::RunCreated {
                user_id,
                request_chars: request_text.chars().count(),
                request_redactions: redaction.total(),
            },
        ));
        tracing::info!(
            run_id = %id,
            request_chars = request_text.chars().count(),
            redactions = redaction.total(),
            "Run created"
        );

        let machine = RunStateMachine::new(
            entry.run,
            entry.cancel,
            SecretString::from(request_text.to_string()),
            Arc::clone(&self.pipeline),
        );
        machine.spawn();

        Ok(id)
    }

    /// Point-in-time copy of a run.
    pub fn get_state(&self, run_id: &str) -> Option<Run> {
        let entry = self.entry(run_id)?;
        let snapshot = entry.run.read().clone();
        Some(snapshot)
    }

    /// Caller-facing projection of a run.
    pub fn view(&self, run_id: &str) -> Option<RunView> {
        self.get_state(run_id).map(|run| RunView::from(&run))
    }

    /// Request cooperative cancellation.
    ///
    /// Returns `false` for unknown or already terminal runs. Otherwise the
    /// flag is set and the run fails with `cancelled` at its next step
    /// boundary. A run already inside its last step finishes normally even
    /// though this returned `true`.
    pub fn cancel(&self, run_id: &str) -> bool {
        let Some(entry) = self.entry(run_id) else {
            return false;
        };

        // Held across the store so the run cannot turn terminal in between.
        let run = entry.run.write();
        if run.is_terminal() {
            return false;
        }
        entry.cancel.store(true, Ordering::SeqCst);
        drop(run);

        tracing::info!(run_id, "Cancellation requested");
        true
    }

    /// Drop a terminal run and return its final state. In-flight and
    /// unknown runs give `None` and stay registered.
    pub fn remove(&self, run_id: &str) -> Option<Run> {
        let mut runs = self.runs.write();
        if !runs.get(run_id)?.run.read().is_terminal() {
            return None;
        }
        runs.remove(run_id).map(|entry| entry.run.read().clone())
    }

    /// Drop every terminal run that finished at least `older_than` ago.
    /// Returns how many were dropped.
    pub fn prune_terminal(&self, older_than: Duration) -> usize {
        let now = Utc::now();
        let mut runs = self.runs.write();
        let before = runs.len();

        runs.retain(|_, entry| {
            let run = entry.run.read();
            let expired = run.is_terminal()
                && run
                    .completed_at
                    .and_then(|at| (now - at).to_std().ok())
                    .is_some_and(|age| age >= older_than);
            !expired
        });

        let pruned = before - runs.len();
        if pruned > 0 {
            tracing::debug!(pruned, remaining = runs.len(), "Pruned terminal runs");
        }
        pruned
    }

    /// Poll until the run is terminal. `None` for unknown runs.
    pub async fn wait_for_terminal(&self, run_id: &str, poll: Duration) -> Option<Run> {
        loop {
            let run = self.get_state(run_id)?;
            if run.is_terminal() {
                return Some(run);
            }
            tokio::time::sleep(poll).await;
        }
    }

    pub fn run_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.runs.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.runs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.read().is_empty()
    }

    fn entry(&self, run_id: &str) -> Option<RunEntry> {
        self.runs.read().get(run_id).cloned()
    }
}
