//! CodeJudge - sandboxed judging engine
//!
//! Runs an untrusted submission against a problem's test cases and reports a
//! verdict. A judging pass flows
//!
//! caller → [`validator`] → [`judge`] { [`harness`] → [`sandbox`] → [`compare`] } → [`format`] → caller
//!
//! - **Validator**: size limit and a denylist of disallowed constructs
//! - **Harness**: per-language adapters that wrap the submission in a
//!   program calling the declared entry point
//! - **Sandbox**: isolated compile and run steps under hard limits
//! - **Compare**: structural comparison of the result with the expectation
//! - **Judge**: the per-submission state machine and verdict aggregation
//! - **Format**: the submitter-facing summary
//!
//! The [`worker`] module drives the engine from a JSON-lines stream and is
//! what the `codejudge` binary runs.

pub mod compare;
pub mod config;
pub mod constants;
pub mod error;
pub mod format;
pub mod harness;
pub mod judge;
pub mod metrics;
pub mod sandbox;
pub mod utils;
pub mod validator;
pub mod worker;

// Re-export commonly used types
pub use codejudge_common::{JudgeResponse, SubmissionRequest, SubmissionStatus, TestCase, Verdict};
pub use config::Config;
pub use error::{JudgeError, SandboxError};
pub use judge::Judge;
