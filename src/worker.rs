//! JSON-lines judge worker
//!
//! Reads one submission per line, `{ "id": ..., <SubmissionRequest fields> }`,
//! and writes one line per submission, `{ "id", "response", "summary" }`, in
//! completion order. Up to `concurrency` submissions are judged at once.
//! Flipping the shutdown flag stops reading and cancels in-flight passes;
//! each cancelled pass still gets its output line.

use std::future::Future;
use std::sync::Arc;

use codejudge_common::{FailureKind, JudgeResponse, SubmissionRequest};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

use crate::format::{format_response, PublicSummary};
use crate::judge::Judge;

/// One input line
#[derive(Debug, Deserialize)]
pub struct WorkerRequest {
    pub id: Value,
    #[serde(flatten)]
    pub request: SubmissionRequest,
}

/// One output line
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum WorkerOutput {
    Judged {
        id: Value,
        response: JudgeResponse,
        summary: PublicSummary,
    },
    /// The line was not a submission at all
    Rejected { id: Value, error: String },
}

/// Totals of one worker run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub judged: usize,
    pub rejected: usize,
    pub cancelled: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),
}

pub struct Worker {
    judge: Arc<Judge>,
    concurrency: usize,
}

impl Worker {
    pub fn new(judge: Arc<Judge>, concurrency: usize) -> Self {
        Self {
            judge,
            concurrency: concurrency.max(1),
        }
    }

    /// Run until `input` is exhausted or shutdown is requested.
    ///
    /// A line that cannot be decoded is answered with a `Rejected` line. A
    /// read error stops reading; submissions already accepted are still
    /// judged and written before the error is returned.
    pub async fn run<R, W>(
        &self,
        input: R,
        mut output: W,
        shutdown: watch::Receiver<bool>,
    ) -> Result<WorkerStats, WorkerError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tracing::info!(concurrency = self.concurrency, "Judge worker started");

        let lines = stream::unfold(Some(input.split(b'\n')), |state| async move {
            let mut segments = state?;
            match segments.next_segment().await {
                Ok(Some(line)) => Some((Ok(line), Some(segments))),
                Ok(None) => None,
                // Unreadable input ends the stream; in-flight passes still finish
                Err(e) => Some((Err(e), None)),
            }
        });

        let outputs = lines
            .take_until(shutdown_requested(shutdown.clone()))
            .filter(|line| {
                let blank = matches!(line, Ok(l) if l.trim_ascii().is_empty());
                async move { !blank }
            })
            .map(|line| {
                let shutdown = shutdown.clone();
                async move {
                    match line {
                        Ok(line) => Ok(self.handle_line(&line, shutdown).await),
                        Err(e) => Err(e),
                    }
                }
            })
            .buffer_unordered(self.concurrency);
        let mut outputs = std::pin::pin!(outputs);

        let mut stats = WorkerStats::default();
        let mut read_error = None;
        while let Some(out) = outputs.next().await {
            let out = match out {
                Ok(out) => out,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read input, draining in-flight submissions");
                    read_error = Some(e);
                    continue;
                }
            };
            match &out {
                WorkerOutput::Judged { response, .. } => {
                    stats.judged += 1;
                    if matches!(response, JudgeResponse::Failure(f) if f.error_kind == FailureKind::Cancelled) {
                        stats.cancelled += 1;
                    }
                }
                WorkerOutput::Rejected { .. } => stats.rejected += 1,
            }

            let mut line = serde_json::to_vec(&out)?;
            line.push(b'\n');
            output.write_all(&line).await?;
            output.flush().await?;
        }

        tracing::info!(
            judged = stats.judged,
            rejected = stats.rejected,
            cancelled = stats.cancelled,
            "Judge worker stopped"
        );
        match read_error {
            Some(e) => Err(e.into()),
            None => Ok(stats),
        }
    }

    async fn handle_line(&self, line: &[u8], shutdown: watch::Receiver<bool>) -> WorkerOutput {
        let line = match std::str::from_utf8(line) {
            Ok(line) => line.trim_end_matches('\r'),
            Err(e) => {
                tracing::warn!(error = %e, "Input line is not UTF-8");
                return WorkerOutput::Rejected {
                    id: Value::Null,
                    error: format!("invalid UTF-8: {}", e),
                };
            }
        };

        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Unparseable input line");
                return WorkerOutput::Rejected {
                    id: Value::Null,
                    error: format!("invalid JSON: {}", e),
                };
            }
        };
        let id = value.get("id").cloned().unwrap_or(Value::Null);

        let WorkerRequest { id, request } = match serde_json::from_value(value) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "Malformed submission");
                return WorkerOutput::Rejected {
                    id,
                    error: format!("invalid submission: {}", e),
                };
            }
        };

        let response = match self
            .judge
            .judge_until(&request, shutdown_requested(shutdown))
            .await
        {
            Ok(response) => response,
            Err(e) => JudgeResponse::Failure(e.to_failure()),
        };
        tracing::debug!(id = %id, status = %response.status(), "Submission judged");

        let summary = format_response(&response, &request.test_cases);
        WorkerOutput::Judged {
            id,
            response,
            summary,
        }
    }
}

/// Resolves once the flag turns true; never if the sender is gone
fn shutdown_requested(mut rx: watch::Receiver<bool>) -> impl Future<Output = ()> {
    async move {
        if rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::SandboxError;
    use crate::harness::LanguageRegistry;
    use crate::sandbox::{RunOutcome, RunSpec, Sandbox};
    use crate::validator::Validator;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Prints `[0,1]` for every test case after an optional delay
    struct EchoSandbox {
        delay: Duration,
    }

    #[async_trait]
    impl Sandbox for EchoSandbox {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn run(&self, spec: &RunSpec) -> Result<RunOutcome, SandboxError> {
            if spec.case_dir.is_some() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(RunOutcome {
                stdout: "[0,1]\n".to_string(),
                exit_code: Some(0),
                wall_time_ms: 5,
                ..Default::default()
            })
        }
    }

    fn worker(scratch_root: &std::path::Path, delay: Duration) -> Worker {
        let mut config = Config::default();
        config.sandbox.scratch_root = scratch_root.to_path_buf();
        let validator = Validator::with_defaults(config.limits.max_source_bytes).unwrap();
        let registry = LanguageRegistry::with_defaults(&config.toolchain);
        let judge = Judge::new(config, registry, validator, Arc::new(EchoSandbox { delay }));
        Worker::new(Arc::new(judge), 2)
    }

    fn submission(id: u64) -> String {
        serde_json::json!({
            "id": id,
            "sourceCode": "def twoSum(nums, target):\n    return [0, 1]\n",
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
        })
        .to_string()
    }

    fn output_lines(output: &[u8]) -> Vec<Value> {
        String::from_utf8_lossy(output)
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_judges_every_line() {
        let root = tempfile::tempdir().unwrap();
        let input = format!("{}\n\n{}\nnot json\n{{\"id\": 9}}\n", submission(1), submission(2));
        let mut output = Vec::new();
        let (_tx, rx) = watch::channel(false);

        let stats = worker(root.path(), Duration::ZERO)
            .run(input.as_bytes(), &mut output, rx)
            .await
            .unwrap();
        assert_eq!(stats.judged, 2);
        assert_eq!(stats.rejected, 2);

        let lines = output_lines(&output);
        assert_eq!(lines.len(), 4);
        let mut judged: Vec<u64> = lines
            .iter()
            .filter(|l| l.get("response").is_some())
            .map(|l| l["id"].as_u64().unwrap())
            .collect();
        judged.sort_unstable();
        assert_eq!(judged, vec![1, 2]);
        for line in lines.iter().filter(|l| l.get("response").is_some()) {
            assert_eq!(line["response"]["status"], "Accepted");
            assert_eq!(line["summary"]["testsPassed"], "1/1");
        }
        assert!(lines.iter().any(|l| l["id"] == 9 && l.get("error").is_some()));
    }

    #[tokio::test]
    async fn test_undecodable_line_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let mut input = submission(1).into_bytes();
        input.extend_from_slice(b"\n{\"id\": 2, \"sourceCode\": \"\xff\xfe\"}\r\n");
        input.extend_from_slice(submission(3).as_bytes());
        input.push(b'\n');
        let mut output = Vec::new();
        let (_tx, rx) = watch::channel(false);

        let stats = worker(root.path(), Duration::ZERO)
            .run(&input[..], &mut output, rx)
            .await
            .unwrap();
        assert_eq!(stats.judged, 2);
        assert_eq!(stats.rejected, 1);

        let lines = output_lines(&output);
        assert_eq!(lines.len(), 3);
        let mut judged: Vec<u64> = lines
            .iter()
            .filter(|l| l.get("response").is_some())
            .map(|l| l["id"].as_u64().unwrap())
            .collect();
        judged.sort_unstable();
        assert_eq!(judged, vec![1, 3]);
        let rejected = lines.iter().find(|l| l.get("error").is_some()).unwrap();
        assert!(rejected["error"].as_str().unwrap().contains("UTF-8"));
    }

    /// Fails every read
    struct BrokenInput;

    impl tokio::io::AsyncRead for BrokenInput {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Err(std::io::Error::other("device gone")))
        }
    }

    #[tokio::test]
    async fn test_read_error_drains_accepted_submissions() {
        let root = tempfile::tempdir().unwrap();
        let first = format!("{}\n", submission(4)).into_bytes();
        let input = tokio::io::BufReader::new(tokio::io::AsyncReadExt::chain(&first[..], BrokenInput));
        let mut output = Vec::new();
        let (_tx, rx) = watch::channel(false);

        let result = worker(root.path(), Duration::from_millis(20))
            .run(input, &mut output, rx)
            .await;
        assert!(matches!(result, Err(WorkerError::Io(_))));

        let lines = output_lines(&output);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["id"], 4);
        assert_eq!(lines[0]["response"]["status"], "Accepted");
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight() {
        let root = tempfile::tempdir().unwrap();
        let input = format!("{}\n", submission(7));
        let mut output = Vec::new();
        let (tx, rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(true);
        });
        let stats = worker(root.path(), Duration::from_secs(30))
            .run(input.as_bytes(), &mut output, rx)
            .await
            .unwrap();
        assert_eq!(stats.cancelled, 1);

        let lines = output_lines(&output);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["id"], 7);
        assert_eq!(lines[0]["response"]["errorKind"], "Cancelled");
        assert!(std::fs::read_dir(root.path()).unwrap().next().is_none());
    }
}
