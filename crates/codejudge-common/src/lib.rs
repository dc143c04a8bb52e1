//! Common types and errors shared by the judging engine and its callers.
//!
//! Callers build a [`SubmissionRequest`], the engine answers with a
//! [`JudgeResponse`]. Everything here is plain data: no I/O, no process
//! management.

pub mod error;
pub mod types;

pub use error::{HarnessBuildError, ValidationError};
pub use types::*;
