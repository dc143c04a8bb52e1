//! Result formatter
//!
//! Maps a [`JudgeResponse`] onto the summary shown to the submitter. Pure
//! presentation: labels and messages are derived from the verdict alone, so
//! the same verdict always formats the same way.

use codejudge_common::{
    ErrorKind, FailureKind, JudgeFailure, JudgeResponse, SubmissionStatus, TestCase, TestResult,
    Verdict,
};
use serde::{Deserialize, Serialize};

/// Caller-facing summary of one judging pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicSummary {
    pub status: SubmissionStatus,
    /// Average time per test case, e.g. `"12ms"`
    pub runtime: String,
    /// Peak memory, e.g. `"2048KB"`, or `"N/A"`
    pub memory: String,
    /// `"<passed>/<total>"`
    pub tests_passed: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiler_output: Option<String>,
    pub details: Vec<PublicTestDetail>,
}

/// One test case as the submitter may see it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicTestDetail {
    pub index: usize,
    pub passed: bool,
    pub is_public: bool,
    pub execution_time_ms: u64,
    /// Hidden test cases never expose their data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

const NOT_AVAILABLE: &str = "N/A";

/// Format any response. `test_cases` are the request's, in the same order.
pub fn format_response(response: &JudgeResponse, test_cases: &[TestCase]) -> PublicSummary {
    match response {
        JudgeResponse::Verdict(verdict) => format(verdict, test_cases),
        JudgeResponse::Failure(failure) => format_failure(failure, test_cases.len()),
    }
}

/// Format a completed verdict
pub fn format(verdict: &Verdict, test_cases: &[TestCase]) -> PublicSummary {
    let compiler_output = match verdict.status {
        SubmissionStatus::CompileError => verdict.message.clone(),
        _ => None,
    };

    PublicSummary {
        status: verdict.status,
        runtime: format!("{}ms", verdict.average_execution_time_ms.round() as u64),
        memory: memory_label(verdict.peak_memory_kb),
        tests_passed: format!("{}/{}", verdict.passed_count, verdict.total_count),
        message: status_message(verdict),
        compiler_output,
        details: verdict
            .test_results
            .iter()
            .map(|result| detail(result, test_cases.get(result.index)))
            .collect(),
    }
}

/// Format a pass that ended before any test case ran
pub fn format_failure(failure: &JudgeFailure, total_count: usize) -> PublicSummary {
    let message = match failure.error_kind {
        FailureKind::SandboxFault => {
            "The judge could not evaluate this submission. Please try again.".to_string()
        }
        FailureKind::Cancelled => "Judging was cancelled.".to_string(),
        _ => failure.message.clone(),
    };

    PublicSummary {
        status: failure.status,
        runtime: NOT_AVAILABLE.to_string(),
        memory: NOT_AVAILABLE.to_string(),
        tests_passed: format!("0/{}", total_count),
        message,
        compiler_output: None,
        details: Vec::new(),
    }
}

fn memory_label(peak_memory_kb: Option<u64>) -> String {
    match peak_memory_kb {
        Some(kb) => format!("{}KB", kb),
        None => NOT_AVAILABLE.to_string(),
    }
}

fn status_message(verdict: &Verdict) -> String {
    let (passed, total) = (verdict.passed_count, verdict.total_count);
    match verdict.status {
        SubmissionStatus::Accepted => format!("Success! All {} test cases passed.", total),
        SubmissionStatus::CompileError => {
            "Compilation failed. Fix the errors and resubmit.".to_string()
        }
        SubmissionStatus::InternalError => {
            "The judge could not evaluate this submission. Please try again.".to_string()
        }
        status => {
            let tally = if passed == 0 {
                "All test cases failed. Please review your solution.".to_string()
            } else {
                format!("{} out of {} test cases passed.", passed, total)
            };
            // Name the first test case that produced the reported status
            let first = verdict
                .test_results
                .iter()
                .find(|r| !r.passed && r.status() == status);
            match (status, first) {
                (SubmissionStatus::TimeLimitExceeded, Some(r)) => {
                    format!("Time limit exceeded on test case {}. {}", r.index + 1, tally)
                }
                (SubmissionStatus::RuntimeError, Some(r)) => {
                    let what = match r.error_kind {
                        Some(ErrorKind::MemoryLimitExceeded) => "Memory limit exceeded",
                        Some(ErrorKind::OutputLimitExceeded) => "Output limit exceeded",
                        _ => "Runtime error",
                    };
                    format!("{} on test case {}. {}", what, r.index + 1, tally)
                }
                _ => tally,
            }
        }
    }
}

fn detail(result: &TestResult, test_case: Option<&TestCase>) -> PublicTestDetail {
    // A result without its test case is treated as hidden
    let is_public = test_case.is_some_and(|tc| tc.is_public);

    if is_public {
        PublicTestDetail {
            index: result.index,
            passed: result.passed,
            is_public,
            execution_time_ms: result.execution_time_ms,
            input: test_case.map(|tc| tc.input.clone()),
            actual_output: result.actual_output.clone(),
            expected_output: Some(result.expected_output.clone()),
            error_kind: result.error_kind,
            error_detail: result.error_detail.clone(),
        }
    } else {
        // Exception messages can echo argument values
        PublicTestDetail {
            index: result.index,
            passed: result.passed,
            is_public,
            execution_time_ms: result.execution_time_ms,
            input: None,
            actual_output: None,
            expected_output: None,
            error_kind: result.error_kind,
            error_detail: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cases() -> Vec<TestCase> {
        vec![
            TestCase::new("[2,7,11,15], 9", "[0,1]"),
            TestCase::new("[3,2,4], 6", "[1,2]").hidden(),
        ]
    }

    fn passing(index: usize, expected: &str, time: u64) -> TestResult {
        TestResult::accepted(index, expected.to_string(), expected.to_string(), time, Some(1500))
    }

    #[test]
    fn test_accepted_summary() {
        let verdict = Verdict::from_test_results(vec![
            passing(0, "[0,1]", 10),
            passing(1, "[1,2]", 15),
        ]);
        let summary = format(&verdict, &cases());

        assert_eq!(summary.status, SubmissionStatus::Accepted);
        assert_eq!(summary.runtime, "13ms");
        assert_eq!(summary.memory, "1500KB");
        assert_eq!(summary.tests_passed, "2/2");
        assert_eq!(summary.message, "Success! All 2 test cases passed.");
        assert_eq!(summary.details.len(), 2);
    }

    #[test]
    fn test_hidden_cases_are_redacted() {
        let verdict = Verdict::from_test_results(vec![
            TestResult::wrong_answer(0, Some("[]".into()), "[0,1]".into(), 3, None),
            TestResult::failed(
                1,
                ErrorKind::RuntimeError,
                "IndexError: list index out of range",
                "[1,2]".into(),
                4,
                None,
            ),
        ]);
        let summary = format(&verdict, &cases());

        let public = &summary.details[0];
        assert_eq!(public.input.as_deref(), Some("[2,7,11,15], 9"));
        assert_eq!(public.actual_output.as_deref(), Some("[]"));
        assert_eq!(public.expected_output.as_deref(), Some("[0,1]"));

        let hidden = &summary.details[1];
        assert!(!hidden.is_public);
        assert_eq!(hidden.input, None);
        assert_eq!(hidden.expected_output, None);
        assert_eq!(hidden.error_detail, None);
        assert_eq!(hidden.error_kind, Some(ErrorKind::RuntimeError));

        let json = serde_json::to_string(&summary).unwrap();
        assert!(!json.contains("[3,2,4]"));
        assert!(!json.contains("[1,2]"));
    }

    #[test]
    fn test_failure_messages() {
        let verdict = Verdict::from_test_results(vec![
            TestResult::wrong_answer(0, Some("[]".into()), "[0,1]".into(), 3, None),
            TestResult::wrong_answer(1, Some("[]".into()), "[1,2]".into(), 3, None),
        ]);
        let summary = format(&verdict, &cases());
        assert_eq!(summary.message, "All test cases failed. Please review your solution.");
        assert_eq!(summary.memory, "N/A");

        let verdict = Verdict::from_test_results(vec![
            passing(0, "[0,1]", 5),
            TestResult::failed(1, ErrorKind::TimeoutError, "Time limit of 1000 ms exceeded", "[1,2]".into(), 1000, None),
        ]);
        let summary = format(&verdict, &cases());
        assert_eq!(summary.status, SubmissionStatus::TimeLimitExceeded);
        assert_eq!(
            summary.message,
            "Time limit exceeded on test case 2. 1 out of 2 test cases passed."
        );
    }

    #[test]
    fn test_compile_error_summary() {
        let verdict = Verdict::compile_error(2, "solution.cpp:3:5: error: expected ';'");
        let summary = format(&verdict, &cases());
        assert_eq!(summary.status, SubmissionStatus::CompileError);
        assert_eq!(summary.tests_passed, "0/2");
        assert!(summary.details.is_empty());
        assert!(summary.compiler_output.unwrap().contains("expected ';'"));
    }

    #[test]
    fn test_format_failure() {
        let failure = JudgeFailure::new(
            SubmissionStatus::InternalError,
            FailureKind::SandboxFault,
            "Sandbox fault: Failed to spawn `python3`: No such file or directory",
        );
        let summary = format_response(&JudgeResponse::Failure(failure), &cases());
        assert_eq!(summary.tests_passed, "0/2");
        assert!(!summary.message.contains("python3"));
        assert_eq!(summary.runtime, "N/A");

        let failure = JudgeFailure::new(
            SubmissionStatus::InternalError,
            FailureKind::ValidationError,
            "Source code is 60000 bytes, limit is 50000 bytes",
        );
        let summary = format_failure(&failure, 2);
        assert!(summary.message.contains("60000"));
    }

    #[test]
    fn test_formatting_is_deterministic() {
        let verdict = Verdict::from_test_results(vec![passing(0, "[0,1]", 10)]);
        assert_eq!(format(&verdict, &cases()), format(&verdict, &cases()));
    }
}
