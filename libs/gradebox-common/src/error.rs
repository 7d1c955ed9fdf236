//! Run-level error taxonomy.
//!
//! Candidate faults (exceptions, timeouts, memory overruns) never show up
//! here: they are recorded as that test's failure. These types cover the
//! grading infrastructure itself.

use thiserror::Error;

/// Infrastructure fault unrelated to the submission.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("failed to allocate sandbox runtime: {0}")]
    RuntimeAllocation(String),

    #[error("failed to create execution context: {0}")]
    ContextCreation(String),

    #[error("sandbox worker failed: {0}")]
    Worker(String),
}

#[derive(Error, Debug)]
pub enum GradeError {
    #[error("grading infrastructure fault: {0}")]
    Host(#[from] HostError),

    #[error("grading run cancelled after {completed} of {total} tests")]
    Cancelled { completed: usize, total: usize },
}

#[derive(Error, Debug, PartialEq)]
pub enum CatalogError {
    #[error("duplicate test id: {0}")]
    DuplicateTestId(u32),

    #[error("missing points budget for tier {0}")]
    MissingTierPolicy(u8),

    #[error("tier {0} has more than one points budget")]
    DuplicateTierPolicy(u8),

    #[error("tier budgets must sum to 100, got {0}")]
    BudgetMismatch(u32),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read sandbox config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse sandbox config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {key}: {value}")]
    InvalidOverride { key: &'static str, value: String },

    #[error("invalid sandbox configuration: {0}")]
    Invalid(String),
}
