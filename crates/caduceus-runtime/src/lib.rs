//! # caduceus-runtime
//!
//! Async execution for Caduceus.
//!
//! This crate drives runs through intake, retrieval, synthesis and
//! verification on tokio. The deterministic pieces (merge, selection,
//! verifier, run view) live in `caduceus-core`; this crate supplies the
//! collaborator contracts, the retrieval fan-out, the run state machine and
//! the registry callers talk to.
//!
//! ## Example
//!
//! ```rust,ignore
//! use caduceus_runtime::{
//!     ExtractiveGenerator, InMemoryBackend, KeywordIntakeClassifier, Pipeline, RunRegistry,
//!     RuntimeConfig,
//! };
//!
//! let pipeline = Pipeline::builder(RuntimeConfig::default())
//!     .intake(Arc::new(KeywordIntakeClassifier::new()))
//!     .backend(Arc::new(InMemoryBackend::new("faiss")))
//!     .generator(Arc::new(ExtractiveGenerator::default()))
//!     .build()?;
//!
//! let registry = RunRegistry::new(pipeline);
//! let id = registry.start("What is the sepsis antibiotic policy?", None)?;
//! let run = registry.wait_for_terminal(&id, Duration::from_millis(50)).await;
//! ```

pub mod audit;
pub mod cache;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod machine;
pub mod registry;
pub mod resilience;
pub mod retriever;

pub use audit::{AuditEvent, AuditEventKind, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use cache::MetricsCache;
pub use collaborators::{
    AnswerGenerator, BackendClient, ExtractiveGenerator, HistoricalMetrics, InMemoryBackend,
    IntakeClassifier, KeywordIntakeClassifier, StaticMetrics, NO_EVIDENCE_ANSWER,
};
pub use config::{
    ConfigError, MetricsCacheConfig, RetrievalConfig, RuntimeConfig, StepTimeouts,
    VerifierSettings,
};
pub use error::{CollaboratorError, PipelineError};
pub use machine::{Pipeline, PipelineBuilder, RunStateMachine};
pub use registry::RunRegistry;
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryConfig, RetryingBackend};
pub use retriever::{EvidenceRetriever, EvidenceRetrieverBuilder, RetrievalRequest};
