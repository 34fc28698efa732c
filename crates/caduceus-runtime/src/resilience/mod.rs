//! Resilience patterns for retrieval backends.
//!
//! This module provides:
//! - Circuit breaker keyed by backend id
//! - Retry with exponential backoff for transient backend errors

mod circuit_breaker;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::{RetryConfig, RetryingBackend};
