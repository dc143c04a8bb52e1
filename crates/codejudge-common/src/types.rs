//! Request, result and verdict types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// =============================================================================
// Problem contract
// =============================================================================

/// Declared type of an entry-point parameter or return value.
///
/// Text form: `int`, `long`, `double`, `bool`, `string`, and `T[]` for a
/// sequence of `T` (so `int[][]` is a matrix of ints).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ValueType {
    /// 32-bit signed integer
    Int,
    /// 64-bit signed integer
    Long,
    /// Double precision float
    Double,
    Bool,
    String,
    /// Homogeneous sequence
    List(Box<ValueType>),
}

/// Unparseable type text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown value type: {0}")]
pub struct ParseValueTypeError(pub String);

impl FromStr for ValueType {
    type Err = ParseValueTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(inner) = s.strip_suffix("[]") {
            return Ok(ValueType::List(Box::new(inner.parse()?)));
        }
        match s {
            "int" | "integer" => Ok(ValueType::Int),
            "long" => Ok(ValueType::Long),
            "double" | "float" => Ok(ValueType::Double),
            "bool" | "boolean" => Ok(ValueType::Bool),
            "string" | "str" => Ok(ValueType::String),
            other => Err(ParseValueTypeError(other.to_string())),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Int => write!(f, "int"),
            ValueType::Long => write!(f, "long"),
            ValueType::Double => write!(f, "double"),
            ValueType::Bool => write!(f, "bool"),
            ValueType::String => write!(f, "string"),
            ValueType::List(inner) => write!(f, "{}[]", inner),
        }
    }
}

impl TryFrom<String> for ValueType {
    type Error = ParseValueTypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ValueType> for String {
    fn from(value: ValueType) -> Self {
        value.to_string()
    }
}

impl ValueType {
    /// Check whether a JSON value conforms to this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ValueType::Int => value
                .as_i64()
                .map(|n| i32::try_from(n).is_ok())
                .unwrap_or(false),
            ValueType::Long => value.as_i64().is_some(),
            ValueType::Double => value.is_number(),
            ValueType::Bool => value.is_boolean(),
            ValueType::String => value.is_string(),
            ValueType::List(inner) => value
                .as_array()
                .map(|items| items.iter().all(|item| inner.accepts(item)))
                .unwrap_or(false),
        }
    }

    /// Nesting depth of sequences (`int` is 0, `int[][]` is 2).
    pub fn depth(&self) -> usize {
        match self {
            ValueType::List(inner) => 1 + inner.depth(),
            _ => 0,
        }
    }

    /// Innermost scalar type.
    pub fn scalar(&self) -> &ValueType {
        match self {
            ValueType::List(inner) => inner.scalar(),
            other => other,
        }
    }
}

/// One declared parameter of the entry point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ValueType,
}

/// The function or method the harness must call.
///
/// Supplied by the problem catalog; never guessed from the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPoint {
    pub name: String,
    #[serde(default)]
    pub params: Vec<Param>,
    pub returns: ValueType,
}

/// Per-problem judging contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemContract {
    pub entry_point: EntryPoint,
    /// When false, sequences in the result compare as multisets
    #[serde(default = "default_true")]
    pub order_sensitive: bool,
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Request
// =============================================================================

/// One test case from the problem catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    /// Comma-separated JSON values, one per declared parameter
    pub input: String,
    /// JSON text of the expected return value
    pub expected_output: String,
    /// Whether the caller may see input and outputs
    #[serde(default = "default_true")]
    pub is_public: bool,
}

impl TestCase {
    pub fn new(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
            is_public: true,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.is_public = false;
        self
    }
}

/// Immutable input of one judging pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRequest {
    pub source_code: String,
    pub language: String,
    pub test_cases: Vec<TestCase>,
    /// Wall-clock limit per test case; 0 selects the configured default
    #[serde(default)]
    pub time_limit_ms: u64,
    pub problem: ProblemContract,
}

// =============================================================================
// Results
// =============================================================================

/// Why a single test case failed to produce a comparable output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Crash, uncaught exception or non-zero exit
    RuntimeError,
    /// Wall-clock or CPU limit hit
    TimeoutError,
    /// Memory ceiling hit
    MemoryLimitExceeded,
    /// Too much output
    OutputLimitExceeded,
}

impl ErrorKind {
    /// Submission status this failure contributes
    pub fn status(&self) -> SubmissionStatus {
        match self {
            ErrorKind::TimeoutError => SubmissionStatus::TimeLimitExceeded,
            ErrorKind::RuntimeError
            | ErrorKind::MemoryLimitExceeded
            | ErrorKind::OutputLimitExceeded => SubmissionStatus::RuntimeError,
        }
    }
}

/// Result of executing a single test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    /// Position in the request's test case list (0-indexed)
    pub index: usize,
    pub passed: bool,
    pub actual_output: Option<String>,
    pub expected_output: String,
    pub execution_time_ms: u64,
    pub memory_kb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl TestResult {
    /// Output matched
    pub fn accepted(
        index: usize,
        actual_output: String,
        expected_output: String,
        execution_time_ms: u64,
        memory_kb: Option<u64>,
    ) -> Self {
        Self {
            index,
            passed: true,
            actual_output: Some(actual_output),
            expected_output,
            execution_time_ms,
            memory_kb,
            error_kind: None,
            error_detail: None,
        }
    }

    /// Program finished cleanly but the output differs
    pub fn wrong_answer(
        index: usize,
        actual_output: Option<String>,
        expected_output: String,
        execution_time_ms: u64,
        memory_kb: Option<u64>,
    ) -> Self {
        Self {
            index,
            passed: false,
            actual_output,
            expected_output,
            execution_time_ms,
            memory_kb,
            error_kind: None,
            error_detail: None,
        }
    }

    /// Program failed before producing a comparable output
    pub fn failed(
        index: usize,
        kind: ErrorKind,
        detail: impl Into<String>,
        expected_output: String,
        execution_time_ms: u64,
        memory_kb: Option<u64>,
    ) -> Self {
        Self {
            index,
            passed: false,
            actual_output: None,
            expected_output,
            execution_time_ms,
            memory_kb,
            error_kind: Some(kind),
            error_detail: Some(detail.into()),
        }
    }

    /// Status this result contributes to the verdict
    pub fn status(&self) -> SubmissionStatus {
        if self.passed {
            SubmissionStatus::Accepted
        } else {
            self.error_kind
                .map(|kind| kind.status())
                .unwrap_or(SubmissionStatus::WrongAnswer)
        }
    }
}

/// Aggregate status of a judging pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubmissionStatus {
    Accepted,
    WrongAnswer,
    RuntimeError,
    CompileError,
    TimeLimitExceeded,
    /// Sandbox or infrastructure fault; the pass may be retried
    InternalError,
}

impl SubmissionStatus {
    /// Get short code for status
    pub fn code(&self) -> &'static str {
        match self {
            SubmissionStatus::Accepted => "AC",
            SubmissionStatus::WrongAnswer => "WA",
            SubmissionStatus::RuntimeError => "RE",
            SubmissionStatus::CompileError => "CE",
            SubmissionStatus::TimeLimitExceeded => "TLE",
            SubmissionStatus::InternalError => "IE",
        }
    }

    /// Aggregation precedence, higher wins.
    ///
    /// `CompileError > TimeLimitExceeded > RuntimeError > WrongAnswer`.
    pub fn precedence(&self) -> u8 {
        match self {
            SubmissionStatus::Accepted => 0,
            SubmissionStatus::WrongAnswer => 1,
            SubmissionStatus::RuntimeError => 2,
            SubmissionStatus::TimeLimitExceeded => 3,
            SubmissionStatus::CompileError => 4,
            SubmissionStatus::InternalError => 5,
        }
    }

    /// Only infrastructure faults are worth a retry
    pub fn is_retry_safe(&self) -> bool {
        matches!(self, SubmissionStatus::InternalError)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Accepted => "Accepted",
            SubmissionStatus::WrongAnswer => "WrongAnswer",
            SubmissionStatus::RuntimeError => "RuntimeError",
            SubmissionStatus::CompileError => "CompileError",
            SubmissionStatus::TimeLimitExceeded => "TimeLimitExceeded",
            SubmissionStatus::InternalError => "InternalError",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Aggregated result for an entire submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub status: SubmissionStatus,
    pub test_results: Vec<TestResult>,
    pub passed_count: usize,
    pub total_count: usize,
    pub total_execution_time_ms: u64,
    pub average_execution_time_ms: f64,
    pub peak_memory_kb: Option<u64>,
    /// Compiler output when no test results exist
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Verdict {
    /// Create verdict from per-test results, given in input order
    pub fn from_test_results(results: Vec<TestResult>) -> Self {
        let total_count = results.len();
        let passed_count = results.iter().filter(|r| r.passed).count();

        let total_execution_time_ms: u64 = results.iter().map(|r| r.execution_time_ms).sum();
        let average_execution_time_ms = if total_count > 0 {
            let avg = total_execution_time_ms as f64 / total_count as f64;
            (avg * 100.0).round() / 100.0
        } else {
            0.0
        };
        let peak_memory_kb = results.iter().filter_map(|r| r.memory_kb).max();

        // Highest-precedence failure wins; ties keep the first one seen
        let status = results
            .iter()
            .filter(|r| !r.passed)
            .map(TestResult::status)
            .fold(SubmissionStatus::Accepted, |worst, next| {
                if next.precedence() > worst.precedence() {
                    next
                } else {
                    worst
                }
            });

        Self {
            status,
            test_results: results,
            passed_count,
            total_count,
            total_execution_time_ms,
            average_execution_time_ms,
            peak_memory_kb,
            message: None,
        }
    }

    /// Compilation failed; no test case ran
    pub fn compile_error(total_count: usize, message: impl Into<String>) -> Self {
        Self {
            status: SubmissionStatus::CompileError,
            test_results: Vec::new(),
            passed_count: 0,
            total_count,
            total_execution_time_ms: 0,
            average_execution_time_ms: 0.0,
            peak_memory_kb: None,
            message: Some(message.into()),
        }
    }

    /// Index of the first failing test case, if any
    pub fn first_failure(&self) -> Option<&TestResult> {
        self.test_results.iter().find(|r| !r.passed)
    }
}

// =============================================================================
// Response
// =============================================================================

/// Why a request was rejected before any test case ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    ValidationError,
    UnsupportedLanguage,
    InvalidTestCase,
    HarnessBuildError,
    /// Sandbox infrastructure fault; the whole pass is retry-safe
    SandboxFault,
    /// Caller abandoned the pass
    Cancelled,
}

/// Rejection envelope; always carries zero test results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeFailure {
    pub status: SubmissionStatus,
    pub error_kind: FailureKind,
    pub message: String,
    #[serde(default)]
    pub test_results: Vec<TestResult>,
}

impl JudgeFailure {
    pub fn new(status: SubmissionStatus, error_kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            status,
            error_kind,
            message: message.into(),
            test_results: Vec::new(),
        }
    }
}

/// What the engine hands back to its caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JudgeResponse {
    Verdict(Verdict),
    Failure(JudgeFailure),
}

impl JudgeResponse {
    pub fn status(&self) -> SubmissionStatus {
        match self {
            JudgeResponse::Verdict(v) => v.status,
            JudgeResponse::Failure(f) => f.status,
        }
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        match self {
            JudgeResponse::Verdict(v) => Some(v),
            JudgeResponse::Failure(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wa(index: usize) -> TestResult {
        TestResult::wrong_answer(index, Some("[]".to_string()), "[0,1]".to_string(), 10, Some(100))
    }

    fn tle(index: usize) -> TestResult {
        TestResult::failed(
            index,
            ErrorKind::TimeoutError,
            "Time limit exceeded",
            "[0,1]".to_string(),
            1000,
            None,
        )
    }

    #[test]
    fn test_value_type_parse_and_display() {
        let ty: ValueType = "int[][]".parse().unwrap();
        assert_eq!(
            ty,
            ValueType::List(Box::new(ValueType::List(Box::new(ValueType::Int))))
        );
        assert_eq!(ty.to_string(), "int[][]");
        assert_eq!(ty.depth(), 2);
        assert_eq!(ty.scalar(), &ValueType::Int);
        assert!("matrix".parse::<ValueType>().is_err());
    }

    #[test]
    fn test_value_type_accepts() {
        let ints: ValueType = "int[]".parse().unwrap();
        assert!(ints.accepts(&json!([2, 7, 11, 15])));
        assert!(!ints.accepts(&json!([2, "7"])));
        assert!(!ValueType::Int.accepts(&json!(5_000_000_000i64)));
        assert!(ValueType::Long.accepts(&json!(5_000_000_000i64)));
        assert!(!ValueType::Int.accepts(&json!(1.5)));
        assert!(ValueType::Double.accepts(&json!(1)));
    }

    #[test]
    fn test_request_deserializes_camel_case() {
        let request: SubmissionRequest = serde_json::from_value(json!({
            "sourceCode": "def twoSum(nums, target): return []",
            "language": "python",
            "testCases": [{ "input": "[2,7,11,15], 9", "expectedOutput": "[0,1]" }],
            "timeLimitMs": 1000,
            "problem": {
                "entryPoint": {
                    "name": "twoSum",
                    "params": [
                        { "name": "nums", "type": "int[]" },
                        { "name": "target", "type": "int" }
                    ],
                    "returns": "int[]"
                }
            }
        }))
        .unwrap();

        assert!(request.test_cases[0].is_public);
        assert!(request.problem.order_sensitive);
        assert_eq!(request.problem.entry_point.params[0].ty.to_string(), "int[]");
    }

    #[test]
    fn test_verdict_all_passed_is_accepted() {
        let results = vec![
            TestResult::accepted(0, "[0,1]".into(), "[0,1]".into(), 4, Some(100)),
            TestResult::accepted(1, "[1,2]".into(), "[1,2]".into(), 6, Some(300)),
        ];
        let verdict = Verdict::from_test_results(results);
        assert_eq!(verdict.status, SubmissionStatus::Accepted);
        assert_eq!(verdict.passed_count, 2);
        assert_eq!(verdict.total_execution_time_ms, 10);
        assert_eq!(verdict.average_execution_time_ms, 5.0);
        assert_eq!(verdict.peak_memory_kb, Some(300));
    }

    #[test]
    fn test_verdict_precedence() {
        let verdict = Verdict::from_test_results(vec![wa(0), tle(1), wa(2)]);
        assert_eq!(verdict.status, SubmissionStatus::TimeLimitExceeded);
        assert_eq!(verdict.first_failure().map(|r| r.index), Some(0));

        let runtime = TestResult::failed(
            1,
            ErrorKind::MemoryLimitExceeded,
            "Memory limit exceeded",
            "1".into(),
            5,
            Some(300_000),
        );
        let verdict = Verdict::from_test_results(vec![wa(0), runtime]);
        assert_eq!(verdict.status, SubmissionStatus::RuntimeError);
    }

    #[test]
    fn test_peak_memory_unknown() {
        let verdict = Verdict::from_test_results(vec![tle(0)]);
        assert_eq!(verdict.peak_memory_kb, None);
    }

    #[test]
    fn test_compile_error_has_no_results() {
        let verdict = Verdict::compile_error(3, "main.cpp:1: error");
        assert_eq!(verdict.status, SubmissionStatus::CompileError);
        assert!(verdict.test_results.is_empty());
        assert_eq!(verdict.total_count, 3);
    }

    #[test]
    fn test_response_untagged_roundtrip() {
        let failure = JudgeResponse::Failure(JudgeFailure::new(
            SubmissionStatus::InternalError,
            FailureKind::ValidationError,
            "too large",
        ));
        let text = serde_json::to_string(&failure).unwrap();
        assert!(text.contains("\"status\":\"InternalError\""));
        assert!(text.contains("\"errorKind\":\"ValidationError\""));
        let parsed: JudgeResponse = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, failure);

        let verdict = JudgeResponse::Verdict(Verdict::from_test_results(vec![wa(0)]));
        let parsed: JudgeResponse =
            serde_json::from_str(&serde_json::to_string(&verdict).unwrap()).unwrap();
        assert_eq!(parsed.status(), SubmissionStatus::WrongAnswer);
        assert!(parsed.verdict().is_some());
    }
}
