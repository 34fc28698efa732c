//! External collaborators and the built-in reference implementations.
//!
//! The traits are the narrow seams the pipeline calls through. The built-ins
//! are deterministic and need no network, which makes them suitable for the
//! CLI and for tests; production deployments plug in model-backed
//! classifiers, vector databases and LLM generators instead.

mod extractive;
mod intake;
mod memory;
mod metrics;
mod traits;

pub use extractive::{ExtractiveGenerator, NO_EVIDENCE_ANSWER};
pub use intake::KeywordIntakeClassifier;
pub use memory::InMemoryBackend;
pub use metrics::StaticMetrics;
pub use traits::{AnswerGenerator, BackendClient, HistoricalMetrics, IntakeClassifier};
