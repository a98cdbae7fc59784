//! Core types and error definitions for the Cohort coordination engine.
//!
//! This crate provides the foundational pieces shared across Cohort crates:
//! the unified error enum and the tracing subscriber setup.
//!
//! # Main types
//!
//! - [`CohortError`]: Unified error enum for all Cohort subsystems.
//! - [`CohortResult`]: Convenience alias for `Result<T, CohortError>`.
//! - [`telemetry::init_tracing`]: Installs the process-wide tracing subscriber.

/// Tracing subscriber setup.
pub mod telemetry;

// --- Error types ---

/// Top-level error type for the Cohort engine.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Debug, thiserror::Error)]
pub enum CohortError {
    /// Invalid or inconsistent capability catalog state.
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// A group refused a call because it could not admit more work.
    #[error("admission rejected: {reason}")]
    Admission {
        /// Group that refused the call.
        group: String,
        /// Short reason phrase, e.g. `at capacity`.
        reason: String,
    },

    /// No healthy worker is currently available in the group.
    #[error("Group unavailable: no healthy worker in group '{0}'")]
    GroupUnavailable(String),

    /// A worker replied with a payload that does not match the response contract.
    #[error("Invalid response from group '{group}': {reason}")]
    InvalidResponse {
        /// Group whose worker produced the reply.
        group: String,
        /// What was wrong with the reply.
        reason: String,
    },

    /// A worker call failed or panicked.
    #[error("Worker error: {0}")]
    Worker(String),

    /// A call or run exceeded its time budget.
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// The execution plan could not be built.
    #[error("Planning error: {0}")]
    Planning(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`CohortError`].
pub type CohortResult<T> = Result<T, CohortError>;
