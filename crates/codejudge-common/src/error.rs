//! Caller-facing error taxonomy.
//!
//! These errors are raised before any sandboxed process is spawned. They are
//! properties of the submission or of the problem definition, so retrying the
//! same request yields the same error.

use thiserror::Error;

/// Static pre-execution screen failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Source exceeds the configured byte limit
    #[error("Source code is {size} bytes, limit is {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    /// Source matched a denylist rule
    #[error("Disallowed construct ({rule}): {description}")]
    DisallowedConstruct { rule: String, description: String },
}

impl ValidationError {
    /// Returns the error code string for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            ValidationError::TooLarge { .. } => "TOO_LARGE",
            ValidationError::DisallowedConstruct { .. } => "DISALLOWED_CONSTRUCT",
        }
    }
}

/// The harness could not be generated for the submitted source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HarnessBuildError {
    /// Declared entry point is not defined in the source
    #[error("Entry point `{name}` not found in {language} source")]
    EntryPointNotFound { name: String, language: String },

    /// Declared entry point name is not a plain identifier
    #[error("Entry point name `{0}` is not a valid identifier")]
    InvalidEntryPointName(String),
}
