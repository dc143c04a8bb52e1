//! Judge orchestrator
//!
//! One judging pass walks
//! `Validating → Building → Running(i) → Comparing(i) → Aggregating → Done`.
//! Validation, harness and test case problems end the pass before any
//! process is spawned. A failed compile ends it with a `CompileError`
//! verdict and no test results. Sandbox faults abort the pass as retry-safe
//! `InternalError`s. Everything a submission does wrong at run time is
//! recorded on its own test case and judging continues.

use std::future::Future;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use codejudge_common::{
    ErrorKind, JudgeResponse, SubmissionRequest, TestCase, TestResult, Verdict,
};
use futures::stream::{self, StreamExt, TryStreamExt};
use nix::sys::signal::Signal;
use regex::Regex;
use tracing::Instrument;
use uuid::Uuid;

use crate::compare::compare_text;
use crate::config::{Config, ConfigError};
use crate::constants::{
    COMPILE_MEMORY_LIMIT_KB, COMPILE_OUTPUT_MAX_CHARS, CONTAINER_BUILD_DIR, ERROR_DETAIL_MAX_CHARS,
    RUNTIME_MEMORY_HEADROOM,
};
use crate::error::{JudgeError, SandboxError};
use crate::harness::{extract_result, HarnessProgram, LanguageRegistry, MemoryStrategy};
use crate::metrics;
use crate::sandbox::{self, ResourceLimits, RunOutcome, RunSpec, Sandbox, Scratch};
use crate::utils::hash_string;
use crate::validator::Validator;

/// Stages of one judging pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Validating,
    Building,
    Running(usize),
    Comparing(usize),
    Aggregating,
    Done,
}

fn enter(phase: Phase) {
    tracing::debug!(phase = ?phase, "Entering phase");
}

/// Runs judging passes. Holds no per-submission state, so one instance is
/// shared by every concurrent pass.
pub struct Judge {
    config: Config,
    registry: LanguageRegistry,
    validator: Validator,
    sandbox: Arc<dyn Sandbox>,
}

impl Judge {
    pub fn new(
        config: Config,
        registry: LanguageRegistry,
        validator: Validator,
        sandbox: Arc<dyn Sandbox>,
    ) -> Self {
        Self {
            config,
            registry,
            validator,
            sandbox,
        }
    }

    /// Built-in languages, the configured denylist and sandbox backend
    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        let max_source_bytes = config.limits.max_source_bytes;
        let validator = match &config.worker.denylist_path {
            Some(path) => Validator::load(max_source_bytes, path)?,
            None => Validator::with_defaults(max_source_bytes)?,
        };
        let registry = LanguageRegistry::with_defaults(&config.toolchain);
        let sandbox = sandbox::from_config(&config);
        Ok(Self::new(config, registry, validator, sandbox))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    /// Judge one submission. Every outcome is a well-formed response.
    pub async fn judge(&self, request: &SubmissionRequest) -> JudgeResponse {
        let pass_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "judge",
            pass_id = %pass_id,
            language = %request.language,
            source_sha256 = %hash_string(&request.source_code),
        );

        async {
            let _active = metrics::ActiveGuard::new();
            let started = Instant::now();

            let response = match self.run_pass(request).await {
                Ok(verdict) => JudgeResponse::Verdict(verdict),
                Err(e) => {
                    if matches!(e, JudgeError::Sandbox(_)) {
                        metrics::SANDBOX_FAULTS.inc();
                    }
                    tracing::info!(error_code = e.error_code(), error = %e, "Judging pass rejected");
                    JudgeResponse::Failure(e.to_failure())
                }
            };

            let elapsed = started.elapsed();
            metrics::record_verdict(
                &request.language,
                response.status().as_str(),
                elapsed.as_secs_f64(),
            );
            enter(Phase::Done);
            tracing::info!(
                status = %response.status(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Judging pass finished"
            );
            response
        }
        .instrument(span)
        .await
    }

    /// Judge until `cancel` completes.
    ///
    /// On cancellation the pass is dropped: every live sandboxed process is
    /// killed and the scratch directory removed before this returns.
    pub async fn judge_until<F>(
        &self,
        request: &SubmissionRequest,
        cancel: F,
    ) -> Result<JudgeResponse, JudgeError>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = cancel => {
                metrics::CANCELLED_TOTAL.inc();
                tracing::info!(language = %request.language, "Judging pass cancelled");
                Err(JudgeError::Cancelled)
            }
            response = self.judge(request) => Ok(response),
        }
    }

    async fn run_pass(&self, request: &SubmissionRequest) -> Result<Verdict, JudgeError> {
        enter(Phase::Validating);
        let adapter = self
            .registry
            .resolve(&request.language)
            .ok_or_else(|| JudgeError::UnsupportedLanguage(request.language.clone()))?;
        self.validator.validate(&request.source_code, adapter.id())?;
        if request.test_cases.is_empty() {
            return Err(JudgeError::NoTestCases);
        }

        enter(Phase::Building);
        let program = adapter.build_harness(
            &request.source_code,
            &request.problem,
            self.config.limits.memory_limit_kb,
        )?;
        let payloads = request
            .test_cases
            .iter()
            .enumerate()
            .map(|(index, test_case)| {
                program
                    .stdin_for(test_case)
                    .map_err(|reason| JudgeError::InvalidTestCase { index, reason })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let scratch = Scratch::create(&self.config.sandbox.scratch_root, self.config.sandbox.run_as)?;
        for file in &program.files {
            scratch.write_build_file(&file.name, &file.contents)?;
        }

        if let Some(message) = self.compile(&program, &scratch).await? {
            tracing::debug!("Compilation failed");
            return Ok(Verdict::compile_error(request.test_cases.len(), message));
        }
        scratch.seal_build()?;

        let time_limit_ms = self.config.limits.effective_time_limit_ms(request.time_limit_ms);
        let limits = self.run_limits(program.memory);
        let order_sensitive = request.problem.order_sensitive;
        let workers = self.config.worker.test_workers.max(1);

        // `buffered` yields in input order whatever the completion order
        let results: Vec<TestResult> = stream::iter(request.test_cases.iter().zip(payloads).enumerate())
            .map(|(index, (test_case, stdin))| {
                self.run_case(
                    &scratch,
                    &program,
                    index,
                    test_case,
                    stdin,
                    time_limit_ms,
                    &limits,
                    order_sensitive,
                )
            })
            .buffered(workers)
            .try_collect()
            .await?;

        enter(Phase::Aggregating);
        let verdict = Verdict::from_test_results(results);
        tracing::debug!(
            passed = verdict.passed_count,
            total = verdict.total_count,
            "Aggregated test results"
        );
        Ok(verdict)
    }

    /// Run the compile step. `Some(message)` is a compile error.
    async fn compile(
        &self,
        program: &HarnessProgram,
        scratch: &Scratch,
    ) -> Result<Option<String>, SandboxError> {
        let Some(command) = &program.compile else {
            return Ok(None);
        };

        let spec = RunSpec {
            image: program.image.clone(),
            command: command.clone(),
            stdin: Vec::new(),
            build_dir: scratch.build_dir().to_path_buf(),
            case_dir: None,
            rootfs_dir: scratch.rootfs_dir().to_path_buf(),
            time_limit_ms: self.config.limits.compile_time_limit_ms,
            limits: self.compile_limits(),
        };
        let outcome = self.sandbox.run(&spec).await?;
        if outcome.success() {
            return Ok(None);
        }

        let message = if outcome.timed_out {
            format!(
                "Compilation timed out after {} ms",
                self.config.limits.compile_time_limit_ms
            )
        } else if outcome.memory_exceeded {
            "Compilation exceeded the memory limit".to_string()
        } else {
            let output = if outcome.stderr.trim().is_empty() {
                &outcome.stdout
            } else {
                &outcome.stderr
            };
            truncate(&strip_build_dir(output.trim(), scratch.build_dir()), COMPILE_OUTPUT_MAX_CHARS)
        };
        Ok(Some(message))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_case(
        &self,
        scratch: &Scratch,
        program: &HarnessProgram,
        index: usize,
        test_case: &TestCase,
        stdin: String,
        time_limit_ms: u64,
        limits: &ResourceLimits,
        order_sensitive: bool,
    ) -> Result<TestResult, SandboxError> {
        enter(Phase::Running(index));
        let case_dir = scratch.case_dir(index)?;
        let spec = RunSpec {
            image: program.image.clone(),
            command: program.run.clone(),
            stdin: stdin.into_bytes(),
            build_dir: scratch.build_dir().to_path_buf(),
            case_dir: Some(case_dir.path().to_path_buf()),
            rootfs_dir: scratch.rootfs_dir().to_path_buf(),
            time_limit_ms,
            limits: limits.clone(),
        };
        let outcome = self.sandbox.run(&spec).await?;
        drop(case_dir);

        if let Some(kb) = outcome.peak_memory_kb {
            metrics::record_test_memory(program.language, kb);
        }

        enter(Phase::Comparing(index));
        let result = classify(index, test_case, &outcome, time_limit_ms, order_sensitive);
        tracing::debug!(
            index,
            passed = result.passed,
            time_ms = result.execution_time_ms,
            error_kind = ?result.error_kind,
            "Test case judged"
        );
        Ok(result)
    }

    fn compile_limits(&self) -> ResourceLimits {
        ResourceLimits {
            memory_kb: COMPILE_MEMORY_LIMIT_KB.max(self.config.limits.memory_limit_kb),
            limit_address_space: false,
            output_bytes: self.config.limits.output_limit_bytes,
            max_processes: self.config.sandbox.max_processes,
            max_open_files: self.config.sandbox.max_open_files,
            max_file_size_bytes: self.config.sandbox.max_file_size_bytes,
        }
    }

    fn run_limits(&self, strategy: MemoryStrategy) -> ResourceLimits {
        let memory_limit_kb = self.config.limits.memory_limit_kb;
        let (memory_kb, limit_address_space) = match strategy {
            MemoryStrategy::AddressSpace => (memory_limit_kb, true),
            MemoryStrategy::RuntimeFlag => (memory_limit_kb * RUNTIME_MEMORY_HEADROOM, false),
        };
        ResourceLimits {
            memory_kb,
            limit_address_space,
            output_bytes: self.config.limits.output_limit_bytes,
            max_processes: self.config.sandbox.max_processes,
            max_open_files: self.config.sandbox.max_open_files,
            max_file_size_bytes: self.config.sandbox.max_file_size_bytes,
        }
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Turn a finished run into a test result
fn classify(
    index: usize,
    test_case: &TestCase,
    outcome: &RunOutcome,
    time_limit_ms: u64,
    order_sensitive: bool,
) -> TestResult {
    let expected = test_case.expected_output.clone();
    let time_ms = outcome.wall_time_ms;
    let memory_kb = outcome.peak_memory_kb;
    let failed = |kind: ErrorKind, detail: String| {
        TestResult::failed(index, kind, detail, expected.clone(), time_ms, memory_kb)
    };

    if outcome.timed_out || outcome.signal == Some(Signal::SIGXCPU as i32) {
        return failed(
            ErrorKind::TimeoutError,
            format!("Time limit of {} ms exceeded", time_limit_ms),
        );
    }
    if outcome.memory_exceeded || reports_out_of_memory(outcome) {
        return failed(
            ErrorKind::MemoryLimitExceeded,
            "Memory limit exceeded".to_string(),
        );
    }
    if outcome.output_truncated {
        return failed(
            ErrorKind::OutputLimitExceeded,
            "Output limit exceeded".to_string(),
        );
    }
    if let Some(signal) = outcome.signal {
        return failed(ErrorKind::RuntimeError, signal_detail(signal, &outcome.stderr));
    }
    if outcome.exit_code != Some(0) {
        return failed(
            ErrorKind::RuntimeError,
            runtime_detail(&outcome.stderr, outcome.exit_code),
        );
    }

    let actual = extract_result(&outcome.stdout);
    if compare_text(actual, &expected, order_sensitive) {
        TestResult::accepted(
            index,
            actual.unwrap_or_default().to_string(),
            expected,
            time_ms,
            memory_kb,
        )
    } else {
        TestResult::wrong_answer(index, actual.map(str::to_string), expected, time_ms, memory_kb)
    }
}

/// A failed run whose final error is an allocation failure, as each
/// runtime reports it. Earlier stderr lines are user output and ignored.
fn reports_out_of_memory(outcome: &RunOutcome) -> bool {
    if outcome.exit_code == Some(0) {
        return false;
    }
    let Some(line) = final_error_line(&outcome.stderr) else {
        return false;
    };
    line.starts_with("MemoryError")
        || line.starts_with("terminate called after throwing an instance of 'std::bad_alloc'")
        || (line.starts_with("FATAL ERROR:") && line.ends_with("JavaScript heap out of memory"))
        || EXCEPTION_LINE
            .captures(line)
            .is_some_and(|caps| caps[1].starts_with("java.lang.OutOfMemoryError"))
}

/// Last unindented stderr line, skipping stack frames and trace banners
fn final_error_line(stderr: &str) -> Option<&str> {
    stderr.lines().rev().map(str::trim_end).find(|line| {
        !line.is_empty() && !line.starts_with(char::is_whitespace) && !line.starts_with("-----")
    })
}

static EXCEPTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(?:Exception in thread "[^"]*" )?([A-Za-z_][\w.$]*(?:Error|Exception)\b.*)$"#)
        .expect("valid exception regex")
});

static CPP_WHAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^terminate called after throwing an instance of '([^']+)'(?:\s*\n\s*what\(\):\s*(.*))?")
        .expect("valid terminate regex")
});

fn signal_detail(signal: i32, stderr: &str) -> String {
    let description = match Signal::try_from(signal) {
        Ok(Signal::SIGSEGV) => "Segmentation fault",
        Ok(Signal::SIGABRT) => "Aborted",
        Ok(Signal::SIGFPE) => "Floating point exception",
        Ok(Signal::SIGBUS) => "Bus error",
        Ok(Signal::SIGILL) => "Illegal instruction",
        Ok(Signal::SIGKILL) => "Killed",
        Ok(Signal::SIGXFSZ) => "File size limit exceeded",
        Ok(other) => other.as_str(),
        Err(_) => "Terminated",
    };
    let mut detail = format!("{} (signal {})", description, signal);

    if let Some(caps) = CPP_WHAT.captures(stderr) {
        detail.push_str(": ");
        detail.push_str(&caps[1]);
        if let Some(what) = caps.get(2) {
            detail.push_str(": ");
            detail.push_str(what.as_str().trim());
        }
    }
    truncate(&detail, ERROR_DETAIL_MAX_CHARS)
}

/// The last exception-looking stderr line, else the last non-empty one
fn runtime_detail(stderr: &str, exit_code: Option<i32>) -> String {
    let lines = || stderr.lines().rev().map(str::trim_end).filter(|l| !l.trim().is_empty());

    let detail = lines()
        .find_map(|line| EXCEPTION_LINE.captures(line).map(|caps| caps[1].to_string()))
        .or_else(|| lines().next().map(|line| line.trim().to_string()))
        .unwrap_or_else(|| match exit_code {
            Some(code) => format!("Process exited with code {}", code),
            None => "Process terminated abnormally".to_string(),
        });
    truncate(&detail, ERROR_DETAIL_MAX_CHARS)
}

/// Drop the private scratch path from tool output
fn strip_build_dir(text: &str, build_dir: &Path) -> String {
    let host = format!("{}/", build_dir.display());
    let container = format!("{}/", CONTAINER_BUILD_DIR);
    text.replace(&host, "").replace(&container, "")
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
