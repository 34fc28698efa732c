//! RunStateMachine: drives one run through the four pipeline steps.
//!
//! # Lifecycle
//! `Pending -> Running -> Intake -> Retrieval -> Synthesis -> Verification`
//! and then exactly one of `Completed`, `Abstained` or `Failed`.
//!
//! - Steps run strictly in order; each step's output is the next one's input
//! - Cancellation is checked only between steps
//! - `current_step`/`steps_completed` move only after a step commits
//! - A step error is terminal; the machine never retries a step itself
//! - Only redacted text, hashes and counts reach the run or the audit sink

use chrono::Utc;
use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use caduceus_core::{
    doc_hash, redact, AbstentionReason, DraftAnswer, EvidenceBundle, GroundingVerifier, RequestPlan,
    Run, RunFailure, RunStatus, Step, VerificationResult,
};

use crate::audit::{AuditEvent, AuditEventKind, AuditSink, TracingAuditSink};
use crate::cache::MetricsCache;
use crate::collaborators::{AnswerGenerator, BackendClient, HistoricalMetrics, IntakeClassifier};
use crate::config::{ConfigError, RuntimeConfig};
use crate::error::{CollaboratorError, PipelineError};
use crate::retriever::{EvidenceRetriever, RetrievalRequest};

/// Collaborators and settings shared by every run.
pub struct Pipeline {
    intake: Arc<dyn IntakeClassifier>,
    retriever: EvidenceRetriever,
    generator: Arc<dyn AnswerGenerator>,
    verifier: Arc<GroundingVerifier>,
    audit: Arc<dyn AuditSink>,
    config: RuntimeConfig,
}

impl Pipeline {
    pub fn builder(config: RuntimeConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn retriever(&self) -> &EvidenceRetriever {
        &self.retriever
    }

    pub fn verifier(&self) -> &GroundingVerifier {
        &self.verifier
    }

    pub fn audit(&self) -> &dyn AuditSink {
        self.audit.as_ref()
    }
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    config: RuntimeConfig,
    intake: Option<Arc<dyn IntakeClassifier>>,
    backends: Vec<Arc<dyn BackendClient>>,
    metrics: Option<Arc<dyn HistoricalMetrics>>,
    generator: Option<Arc<dyn AnswerGenerator>>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl PipelineBuilder {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            intake: None,
            backends: Vec::new(),
            metrics: None,
            generator: None,
            audit: None,
        }
    }

    pub fn intake(mut self, intake: Arc<dyn IntakeClassifier>) -> Self {
        self.intake = Some(intake);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn BackendClient>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn HistoricalMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn AnswerGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Defaults to [`TracingAuditSink`].
    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn build(self) -> Result<Pipeline, ConfigError> {
        self.config.validate()?;

        let intake = self
            .intake
            .ok_or(ConfigError::MissingCollaborator("intake_classifier"))?;
        let generator = self
            .generator
            .ok_or(ConfigError::MissingCollaborator("answer_generator"))?;
        if self.backends.is_empty() {
            return Err(ConfigError::MissingCollaborator("backend_client"));
        }

        let mut retriever = EvidenceRetriever::builder(self.config.retrieval.clone());
        for backend in self.backends {
            retriever = retriever.backend(backend);
        }
        if let Some(source) = self.metrics {
            retriever = retriever.metrics(MetricsCache::from_config(source, &self.config.metrics_cache));
        }

        Ok(Pipeline {
            intake,
            retriever: retriever.build(),
            generator,
            verifier: Arc::new(GroundingVerifier::with_config(self.config.verifier.verifier_config())),
            audit: self.audit.unwrap_or_else(|| Arc::new(TracingAuditSink)),
            config: self.config,
        })
    }
}

enum Outcome {
    Completed(String),
    Abstained(AbstentionReason),
    Failed {
        error: PipelineError,
        step: Option<Step>,
    },
}

/// Owns the transitions of one run.
pub struct RunStateMachine {
    run: Arc<RwLock<Run>>,
    cancel: Arc<AtomicBool>,
    request: SecretString,
    pipeline: Arc<Pipeline>,
}

impl RunStateMachine {
    /// `request` is the raw request text. It is handed to collaborators and
    /// never written to the run.
    pub fn new(
        run: Arc<RwLock<Run>>,
        cancel: Arc<AtomicBool>,
        request: SecretString,
        pipeline: Arc<Pipeline>,
    ) -> Self {
        Self {
            run,
            cancel,
            request,
            pipeline,
        }
    }

    pub fn snapshot(&self) -> Run {
        self.run.read().clone()
    }

    /// Run to a terminal state and return it.
    pub async fn execute(self) -> RunStatus {
        let outcome = self.drive().await;
        self.finish(outcome)
    }

    /// Execute on the tokio runtime. If the run task panics, the run is
    /// failed at the step it was in rather than left in flight.
    pub fn spawn(self) -> JoinHandle<RunStatus> {
        let run = Arc::clone(&self.run);
        let pipeline = Arc::clone(&self.pipeline);
        let task = tokio::spawn(self.execute());

        tokio::spawn(async move {
            match task.await {
                Ok(status) => status,
                Err(join) => {
                    let status = run.read().status;
                    let step = Step::ALL.into_iter().find(|step| step.status() == status);
                    let error = PipelineError::CollaboratorError {
                        collaborator: "run_task".to_string(),
                        message: if join.is_panic() { "panicked" } else { "cancelled" }.to_string(),
                    };
                    settle(&run, pipeline.audit.as_ref(), Outcome::Failed { error, step })
                }
            }
        })
    }

    async fn drive(&self) -> Outcome {
        if self.cancelled() {
            return cancelled_outcome();
        }
        self.transition(RunStatus::Running, |run| run.started_at = Some(Utc::now()));

        let plan = match self
            .run_step(Step::Intake, self.intake(), |run, plan: &RequestPlan| {
                run.request_type = Some(plan.request_type);
                run.risk_label = Some(plan.risk_label);
            })
            .await
        {
            Ok(plan) => plan,
            Err(outcome) => return outcome,
        };

        if plan.must_abstain() {
            tracing::info!(
                run_id = %self.run_id(),
                risk = plan.risk_label.as_str(),
                "Request out of scope, abstaining after intake"
            );
            return Outcome::Abstained(AbstentionReason::UnsafeContent);
        }

        let bundle = match self
            .run_step(Step::Retrieval, self.retrieve(&plan), |_, _| {})
            .await
        {
            Ok(bundle) => bundle,
            Err(outcome) => return outcome,
        };

        let draft = match self
            .run_step(Step::Synthesis, self.synthesize(&bundle), |_, _| {})
            .await
        {
            Ok(draft) => draft,
            Err(outcome) => return outcome,
        };

        let (result, draft) = match self
            .run_step(Step::Verification, self.verify(draft, bundle), |_, _| {})
            .await
        {
            Ok(verified) => verified,
            Err(outcome) => return outcome,
        };

        if result.passed {
            Outcome::Completed(draft.text)
        } else {
            Outcome::Abstained(
                result
                    .abstention_reason
                    .unwrap_or(AbstentionReason::GroundingFail),
            )
        }
    }

    /// Check cancellation, enter `step`, await `work`, then commit.
    async fn run_step<T, F, A>(&self, step: Step, work: F, apply: A) -> Result<T, Outcome>
    where
        F: Future<Output = Result<T, PipelineError>>,
        A: FnOnce(&mut Run, &T),
    {
        if self.cancelled() {
            tracing::info!(run_id = %self.run_id(), step = step.as_str(), "Cancellation observed");
            return Err(cancelled_outcome());
        }

        self.transition(step.status(), |_| {});
        tracing::debug!(run_id = %self.run_id(), step = step.as_str(), "Step started");

        let output = work.await.map_err(|error| Outcome::Failed {
            error,
            step: Some(step),
        })?;

        {
            let mut run = self.run.write();
            apply(&mut run, &output);
            run.current_step = Some(step);
            run.steps_completed += 1;
        }
        tracing::debug!(run_id = %self.run_id(), step = step.as_str(), "Step committed");

        Ok(output)
    }

    async fn intake(&self) -> Result<RequestPlan, PipelineError> {
        let started = Instant::now();
        let request = self.request.expose_secret();
        let result = bounded(
            "intake_classifier",
            self.pipeline.config.steps.intake_timeout,
            self.pipeline.intake.classify(request),
        )
        .await;

        let outputs = match &result {
            Ok(plan) => json!({
                "request_type": plan.request_type,
                "risk_label": plan.risk_label,
                "scope": plan.scope,
                "confidence": plan.confidence,
                "tools": plan.required_tools(),
            }),
            Err(e) => json!({ "error": e.kind().as_str() }),
        };
        self.tool_call(
            "classify_intent",
            json!({ "request_chars": request.chars().count() }),
            outputs,
            started,
            result.is_ok(),
        );

        result
    }

    async fn retrieve(&self, plan: &RequestPlan) -> Result<EvidenceBundle, PipelineError> {
        let started = Instant::now();
        let query = self.run.read().request_text.clone();
        let query_hash = doc_hash(&query);

        let mut filters = plan.filters();
        let filters_dropped = filters.retain(|value| self.safe_filter_value(value, &query));
        if filters_dropped > 0 {
            tracing::debug!(run_id = %self.run_id(), filters_dropped, "Dropped PHI-bearing filters");
        }

        let request = RetrievalRequest::new(query, self.pipeline.config.retrieval.top_k)
            .with_filters(filters)
            .with_query_type(plan.request_type);

        let result = self.pipeline.retriever.retrieve(&request).await;

        let outputs = match &result {
            Ok(bundle) => json!({
                "items": bundle.items.len(),
                "backends": bundle.backends_queried,
                "agreement_score": bundle.agreement_score,
                "mode": bundle.mode,
            }),
            Err(e) => json!({ "error": e.kind().as_str() }),
        };
        self.tool_call(
            "retrieve_evidence",
            json!({
                "query_hash": query_hash,
                "top_k": request.top_k,
                "filters": request.filters,
                "filters_dropped": filters_dropped,
            }),
            outputs,
            started,
            result.is_ok(),
        );

        if let Ok(bundle) = &result {
            self.audit(AuditEventKind::EvidenceRetrieval {
                query_hash,
                backends: bundle.backends_queried.iter().cloned().collect(),
                doc_hashes: bundle.doc_hashes().into_iter().map(str::to_string).collect(),
                scores: bundle.scores(),
                agreement_score: bundle.agreement_score,
                selected_backend: bundle.selected_backend.clone(),
            });
        }

        result
    }

    async fn synthesize(&self, bundle: &EvidenceBundle) -> Result<DraftAnswer, PipelineError> {
        let started = Instant::now();
        let prompt_version = self.pipeline.config.prompt_version.as_deref();
        let result = bounded(
            "answer_generator",
            self.pipeline.config.steps.synthesis_timeout,
            self.pipeline
                .generator
                .generate(self.request.expose_secret(), bundle, prompt_version),
        )
        .await;

        let outputs = match &result {
            Ok(draft) => json!({
                "answer_chars": draft.text.chars().count(),
                "claims": draft.claims.len(),
                "citations": draft.citations.len(),
            }),
            Err(e) => json!({ "error": e.kind().as_str() }),
        };
        self.tool_call(
            "generate_answer",
            json!({ "evidence_items": bundle.items.len(), "prompt_version": prompt_version }),
            outputs,
            started,
            result.is_ok(),
        );

        if let Ok(draft) = &result {
            for (position, hash) in &draft.citations {
                self.audit(AuditEventKind::Citation {
                    claim_position: *position,
                    doc_hash: hash.clone(),
                });
            }
        }

        result
    }

    /// Verification is CPU-bound, so it runs on the blocking pool under its
    /// own timeout. The draft is handed back for the final answer.
    async fn verify(
        &self,
        draft: DraftAnswer,
        bundle: EvidenceBundle,
    ) -> Result<(VerificationResult, DraftAnswer), PipelineError> {
        let started = Instant::now();
        let timeout = self.pipeline.config.steps.verification_timeout;
        let claims = draft.claims.len();
        let evidence_items = bundle.items.len();

        let verifier = Arc::clone(&self.pipeline.verifier);
        let handle = tokio::task::spawn_blocking(move || {
            let result = verifier.verify(&draft, &bundle);
            (result, draft)
        });

        let result = match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(verified)) => Ok(verified),
            Ok(Err(join)) => Err(PipelineError::CollaboratorError {
                collaborator: "grounding_verifier".to_string(),
                message: join.to_string(),
            }),
            Err(_) => Err(PipelineError::CollaboratorTimeout {
                collaborator: "grounding_verifier".to_string(),
                timeout,
            }),
        };

        let outputs = match &result {
            Ok((verdict, _)) => json!({
                "status": verdict.status,
                "passed": verdict.passed,
                "grounded_claims": verdict.grounded_claims,
                "total_claims": verdict.total_claims,
                "issues": verdict.issues.iter().map(|i| i.kind).collect::<Vec<_>>(),
            }),
            Err(e) => json!({ "error": e.kind().as_str() }),
        };
        self.tool_call(
            "verify_grounding",
            json!({ "claims": claims, "evidence_items": evidence_items }),
            outputs,
            started,
            result.is_ok(),
        );

        if let Ok((verdict, _)) = &result {
            self.audit(AuditEventKind::verification(verdict));
        }

        result
    }

    fn finish(&self, outcome: Outcome) -> RunStatus {
        settle(&self.run, self.pipeline.audit.as_ref(), outcome)
    }

    /// A constraint value may become a filter only if it is not PHI by
    /// itself and was not hidden by redacting the request.
    fn safe_filter_value(&self, value: &str, redacted_request: &str) -> bool {
        let mode = self.pipeline.config.verifier.redaction_mode();
        !redact(value, mode).detected()
            && (redacted_request.contains(value) || !self.request.expose_secret().contains(value))
    }

    fn transition(&self, to: RunStatus, apply: impl FnOnce(&mut Run)) {
        let from = {
            let mut run = self.run.write();
            let from = run.status;
            run.status = to;
            apply(&mut run);
            from
        };
        self.audit(AuditEventKind::StatusTransition { from, to });
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn run_id(&self) -> String {
        self.run.read().id.clone()
    }

    fn audit(&self, kind: AuditEventKind) {
        self.pipeline.audit.record(AuditEvent::new(self.run_id(), kind));
    }

    fn tool_call(
        &self,
        name: &str,
        inputs: serde_json::Value,
        outputs: serde_json::Value,
        started: Instant,
        success: bool,
    ) {
        self.audit(AuditEventKind::ToolCall {
            name: name.to_string(),
            inputs,
            outputs,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            success,
        });
    }
}

/// Enter the terminal state. A run that is already terminal is left
/// untouched.
fn settle(run: &RwLock<Run>, audit: &dyn AuditSink, outcome: Outcome) -> RunStatus {
    let (id, from, to) = {
        let mut run = run.write();
        if run.is_terminal() {
            return run.status;
        }

        let from = run.status;
        match outcome {
            Outcome::Completed(answer) => {
                run.status = RunStatus::Completed;
                run.final_answer = Some(answer);
            }
            Outcome::Abstained(reason) => {
                run.status = RunStatus::Abstained;
                run.abstention_reason = Some(reason);
            }
            Outcome::Failed { error, step } => {
                tracing::warn!(
                    run_id = %run.id,
                    step = step.map(|s| s.as_str()).unwrap_or("none"),
                    kind = error.kind().as_str(),
                    error = %error.sanitized(),
                    "Run failed"
                );
                run.status = RunStatus::Failed;
                run.failure = Some(RunFailure {
                    kind: error.kind(),
                    step,
                    message: error.sanitized(),
                });
            }
        }
        run.completed_at = Some(Utc::now());
        (run.id.clone(), from, run.status)
    };

    audit.record(AuditEvent::new(&id, AuditEventKind::StatusTransition { from, to }));
    tracing::info!(run_id = %id, status = to.as_str(), "Run finished");
    to
}

fn cancelled_outcome() -> Outcome {
    Outcome::Failed {
        error: PipelineError::Cancelled,
        step: None,
    }
}

/// Await a collaborator call under `timeout`.
async fn bounded<T>(
    collaborator: &str,
    timeout: Duration,
    call: impl Future<Output = Result<T, CollaboratorError>>,
) -> Result<T, PipelineError> {
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(PipelineError::from_collaborator(collaborator, e)),
        Err(_) => Err(PipelineError::CollaboratorTimeout {
            collaborator: collaborator.to_string(),
            timeout,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::collaborators::{ExtractiveGenerator, InMemoryBackend, KeywordIntakeClassifier};
    use caduceus_core::{Metadata, TOTAL_STEPS};

    fn pipeline(audit: Arc<MemoryAuditSink>) -> Arc<Pipeline> {
        let backend = InMemoryBackend::new("faiss").with_document(
            "sepsis-01",
            "Sepsis antibiotics are given within one hour of recognition.",
            Metadata::new(),
        );
        Arc::new(
            Pipeline::builder(RuntimeConfig::default())
                .intake(Arc::new(KeywordIntakeClassifier::new()))
                .backend(Arc::new(backend))
                .generator(Arc::new(ExtractiveGenerator::default()))
                .audit(audit)
                .build()
                .unwrap(),
        )
    }

    fn machine(request: &str, pipeline: Arc<Pipeline>) -> (RunStateMachine, Arc<AtomicBool>) {
        let run = Arc::new(RwLock::new(Run::new("run-1", request, None)));
        let cancel = Arc::new(AtomicBool::new(false));
        let machine = RunStateMachine::new(
            run,
            Arc::clone(&cancel),
            SecretString::from(request.to_string()),
            pipeline,
        );
        (machine, cancel)
    }

    #[tokio::test]
    async fn test_happy_path_transitions_in_order() {
        let audit = Arc::new(MemoryAuditSink::new());
        let (machine, _) = machine("What is the sepsis antibiotic policy?", pipeline(audit.clone()));
        let run = Arc::clone(&machine.run);

        assert_eq!(machine.execute().await, RunStatus::Completed);

        let run = run.read().clone();
        assert_eq!(run.steps_completed, TOTAL_STEPS);
        assert_eq!(run.current_step, Some(Step::Verification));
        assert!(run.final_answer.is_some());
        assert!(run.completed_at.is_some());

        let statuses: Vec<RunStatus> = audit.transitions("run-1").into_iter().map(|(_, to)| to).collect();
        assert_eq!(
            statuses,
            vec![
                RunStatus::Running,
                RunStatus::Intake,
                RunStatus::Retrieval,
                RunStatus::Synthesis,
                RunStatus::Verification,
                RunStatus::Completed,
            ]
        );
    }

    #[tokio::test]
    async fn test_cancel_before_start_fails_without_steps() {
        let audit = Arc::new(MemoryAuditSink::new());
        let (machine, cancel) = machine("What is the sepsis policy?", pipeline(audit.clone()));
        let run = Arc::clone(&machine.run);
        cancel.store(true, Ordering::SeqCst);

        assert_eq!(machine.execute().await, RunStatus::Failed);

        let run = run.read().clone();
        assert_eq!(run.steps_completed, 0);
        assert_eq!(run.failure.map(|f| f.kind), Some(caduceus_core::FailureKind::Cancelled));
        assert_eq!(audit.transitions("run-1"), vec![(RunStatus::Pending, RunStatus::Failed)]);
    }

    #[tokio::test]
    async fn test_finish_is_idempotent() {
        let audit = Arc::new(MemoryAuditSink::new());
        let (machine, _) = machine("What is the sepsis policy?", pipeline(audit));
        machine.run.write().status = RunStatus::Abstained;

        let status = machine.finish(Outcome::Completed("late".to_string()));
        assert_eq!(status, RunStatus::Abstained);
        assert!(machine.snapshot().final_answer.is_none());
    }

    #[tokio::test]
    async fn test_builder_requires_collaborators() {
        let missing = Pipeline::builder(RuntimeConfig::default())
            .intake(Arc::new(KeywordIntakeClassifier::new()))
            .generator(Arc::new(ExtractiveGenerator::default()))
            .build();
        assert!(matches!(
            missing,
            Err(ConfigError::MissingCollaborator("backend_client"))
        ));
    }
}
