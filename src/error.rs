//! Engine error types
//!
//! [`JudgeError`] covers everything that stops a judging pass before it can
//! produce a verdict. Each variant maps onto the caller-facing failure shape
//! through [`JudgeError::to_failure`].

use codejudge_common::{
    FailureKind, HarnessBuildError, JudgeFailure, SubmissionStatus, ValidationError,
};

/// Infrastructure faults of the isolated runner. Never caused by the
/// submission itself, so the whole pass is safe to retry.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Scratch directory error: {0}")]
    Scratch(#[source] std::io::Error),

    #[error("Failed to wait for sandboxed process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Container runtime error: {0}")]
    Container(String),
}

/// Why a judging pass ended without a verdict
#[derive(Debug, thiserror::Error)]
pub enum JudgeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Invalid test case {index}: {reason}")]
    InvalidTestCase { index: usize, reason: String },

    #[error("Request contains no test cases")]
    NoTestCases,

    #[error(transparent)]
    HarnessBuild(#[from] HarnessBuildError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("Judging pass cancelled")]
    Cancelled,
}

impl JudgeError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(e) => e.error_code(),
            Self::UnsupportedLanguage(_) => "UNSUPPORTED_LANGUAGE",
            Self::InvalidTestCase { .. } | Self::NoTestCases => "INVALID_TEST_CASE",
            Self::HarnessBuild(_) => "HARNESS_BUILD_ERROR",
            Self::Sandbox(_) => "SANDBOX_FAULT",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Validation(_) => FailureKind::ValidationError,
            Self::UnsupportedLanguage(_) => FailureKind::UnsupportedLanguage,
            Self::InvalidTestCase { .. } | Self::NoTestCases => FailureKind::InvalidTestCase,
            Self::HarnessBuild(_) => FailureKind::HarnessBuildError,
            Self::Sandbox(_) => FailureKind::SandboxFault,
            Self::Cancelled => FailureKind::Cancelled,
        }
    }

    /// Status reported to the caller.
    ///
    /// A missing entry point is a property of the submission and reads as a
    /// compile error; everything else is `InternalError`.
    pub fn status(&self) -> SubmissionStatus {
        match self {
            Self::HarnessBuild(_) => SubmissionStatus::CompileError,
            _ => SubmissionStatus::InternalError,
        }
    }

    pub fn to_failure(&self) -> JudgeFailure {
        let message = match self {
            Self::Sandbox(e) => {
                tracing::error!(error = %e, "Sandbox fault");
                format!("Sandbox fault: {}", e)
            }
            _ => self.to_string(),
        };
        JudgeFailure::new(self.status(), self.failure_kind(), message)
    }
}
