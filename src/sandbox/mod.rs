//! Isolated runner
//!
//! Every compile step and every test case runs in its own OS process (or
//! container) with no network, a private working directory, and kernel
//! enforced limits on CPU time, memory, process count, open files and file
//! size. This is the security boundary of the engine.
//!
//! Two backends implement [`Sandbox`]:
//! - [`ProcessSandbox`]: a local child in its own process group, limited with
//!   rlimits and moved into fresh user, mount and network namespaces where
//!   only its own scratch directories are writable.
//! - [`ContainerSandbox`]: one `docker run` per invocation.
//!
//! Both hand the spawned child to an [`ExecutionHandle`], which kills the
//! whole process group (or container) on timeout, completion, cancellation
//! and drop.

mod container;
mod mounts;
mod process;
mod scratch;

pub use container::ContainerSandbox;
pub use process::ProcessSandbox;
pub use scratch::{CaseDir, Scratch};

use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;

use crate::config::{Config, SandboxBackend};
use crate::constants::MEMORY_SAMPLE_INTERVAL_MS;
use crate::error::SandboxError;

/// How long captured pipes may stay open after the process exited
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// One argv element of a sandboxed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandArg {
    /// Passed through unchanged
    Lit(String),
    /// Path relative to the build directory, resolved by the backend
    Build(String),
}

impl CommandArg {
    pub fn lit(value: impl Into<String>) -> Self {
        CommandArg::Lit(value.into())
    }

    pub fn build(relative: impl Into<String>) -> Self {
        CommandArg::Build(relative.into())
    }

    /// Resolve against a concrete build directory
    pub fn resolve(&self, build_dir: &Path) -> String {
        match self {
            CommandArg::Lit(value) => value.clone(),
            CommandArg::Build(relative) if relative.is_empty() => {
                build_dir.display().to_string()
            }
            CommandArg::Build(relative) => build_dir.join(relative).display().to_string(),
        }
    }
}

/// Program plus arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: CommandArg,
    pub args: Vec<CommandArg>,
}

impl CommandSpec {
    pub fn new(program: CommandArg) -> Self {
        Self {
            program,
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: CommandArg) -> Self {
        self.args.push(arg);
        self
    }

    pub fn lit(self, value: impl Into<String>) -> Self {
        self.arg(CommandArg::lit(value))
    }
}

/// Kernel-enforced ceilings for one invocation
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    pub memory_kb: u64,
    /// Apply `RLIMIT_AS`. Runtimes that reserve large virtual ranges (JVM,
    /// V8) bound their heap with a flag instead.
    pub limit_address_space: bool,
    pub output_bytes: usize,
    pub max_processes: u64,
    pub max_open_files: u64,
    pub max_file_size_bytes: u64,
}

/// Everything a backend needs to run one command
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub image: String,
    pub command: CommandSpec,
    pub stdin: Vec<u8>,
    pub build_dir: PathBuf,
    /// Working directory of a test case. `None` is the compile step, which
    /// runs inside the build directory with write access.
    pub case_dir: Option<PathBuf>,
    /// Empty directory the process backend mounts its private root on
    pub rootfs_dir: PathBuf,
    pub time_limit_ms: u64,
    pub limits: ResourceLimits,
}

/// What a finished (or killed) invocation left behind
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub wall_time_ms: u64,
    pub peak_memory_kb: Option<u64>,
    pub timed_out: bool,
    /// Sampled peak memory went over the ceiling
    pub memory_exceeded: bool,
    pub output_truncated: bool,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out
            && !self.memory_exceeded
            && !self.output_truncated
            && self.signal.is_none()
            && self.exit_code == Some(0)
    }
}

/// An isolation backend
#[async_trait]
pub trait Sandbox: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run one command to completion or until a limit trips.
    ///
    /// Limit violations are reported in the [`RunOutcome`]; `Err` is reserved
    /// for infrastructure faults.
    async fn run(&self, spec: &RunSpec) -> Result<RunOutcome, SandboxError>;
}

/// Backend selected by configuration
pub fn from_config(config: &Config) -> Arc<dyn Sandbox> {
    match config.sandbox.backend {
        SandboxBackend::Process => Arc::new(ProcessSandbox::new(config.sandbox.clone())),
        SandboxBackend::Docker => Arc::new(ContainerSandbox::new(config.sandbox.clone())),
    }
}

/// Sole owner of one spawned sandboxed process.
///
/// Dropping the handle kills whatever is still running.
pub struct ExecutionHandle {
    child: Child,
    /// Process group led by the child (process backend)
    pgid: Option<Pid>,
    /// Container name and docker binary (container backend)
    container: Option<(String, String)>,
    reaped: bool,
}

impl ExecutionHandle {
    /// Child spawned with `process_group(0)`
    pub fn process_group(child: Child) -> Self {
        let pgid = child.id().map(|id| Pid::from_raw(id as i32));
        Self {
            child,
            pgid,
            container: None,
            reaped: false,
        }
    }

    /// `docker run` client for the named container
    pub fn container(child: Child, docker_binary: String, name: String) -> Self {
        Self {
            child,
            pgid: None,
            container: Some((docker_binary, name)),
            reaped: false,
        }
    }

    /// Kill everything this handle owns without waiting
    fn kill(&mut self) {
        if let Some(pgid) = self.pgid {
            // ESRCH once the group is gone
            let _ = killpg(pgid, Signal::SIGKILL);
        }
        if let Some((docker, name)) = &self.container {
            let spawned = tokio::process::Command::new(docker)
                .args(["rm", "-f", name.as_str()])
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .spawn();
            if let Err(e) = spawned {
                tracing::warn!(container = %name, error = %e, "Failed to remove container");
            }
        }
        let _ = self.child.start_kill();
    }

    /// Kill and reap the child
    async fn terminate(&mut self) -> Result<ExitStatus, SandboxError> {
        self.kill();
        if let Some((docker, name)) = &self.container {
            // Wait for the container itself to go away, not just the client
            let _ = tokio::process::Command::new(docker)
                .args(["rm", "-f", name.as_str()])
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status()
                .await;
        }
        self.wait().await
    }

    async fn wait(&mut self) -> Result<ExitStatus, SandboxError> {
        let status = self.child.wait().await.map_err(SandboxError::Wait)?;
        self.reaped = true;
        Ok(status)
    }
}

impl Drop for ExecutionHandle {
    fn drop(&mut self) {
        if !self.reaped {
            tracing::debug!("Killing sandboxed process on drop");
            self.kill();
        } else if let Some(pgid) = self.pgid {
            // Stray descendants left in the group
            let _ = killpg(pgid, Signal::SIGKILL);
        }
    }
}

enum Exit {
    Exited(ExitStatus),
    TimedOut,
    MemoryExceeded,
}

/// Feed stdin, capture output and enforce the wall-clock and memory limits
/// of a spawned child.
pub(crate) async fn supervise(
    mut handle: ExecutionHandle,
    stdin: Vec<u8>,
    time_limit: Duration,
    limits: &ResourceLimits,
    sample_memory: bool,
) -> Result<RunOutcome, SandboxError> {
    let start = Instant::now();
    let pid = handle.child.id();

    let stdin_pipe = handle.child.stdin.take();
    let stdout_pipe = handle.child.stdout.take();
    let stderr_pipe = handle.child.stderr.take();

    // A child that never reads its stdin must not block us
    let stdin_task = tokio::spawn(async move {
        if let Some(mut pipe) = stdin_pipe {
            let _ = pipe.write_all(&stdin).await;
            let _ = pipe.shutdown().await;
        }
    });
    let stdout_task = tokio::spawn(read_capped(stdout_pipe, limits.output_bytes));
    let stderr_task = tokio::spawn(read_capped(stderr_pipe, limits.output_bytes));

    let deadline = tokio::time::sleep(time_limit);
    tokio::pin!(deadline);
    let mut ticker = tokio::time::interval(Duration::from_millis(MEMORY_SAMPLE_INTERVAL_MS));
    let sampling = sample_memory && pid.is_some();
    let mut peak_memory_kb: Option<u64> = None;

    let exit = loop {
        tokio::select! {
            status = handle.child.wait() => {
                let status = status.map_err(SandboxError::Wait)?;
                break Exit::Exited(status);
            }
            _ = &mut deadline => break Exit::TimedOut,
            _ = ticker.tick(), if sampling => {
                if let Some(kb) = pid.and_then(read_peak_memory_kb) {
                    peak_memory_kb = Some(peak_memory_kb.map_or(kb, |p| p.max(kb)));
                    if kb > limits.memory_kb {
                        break Exit::MemoryExceeded;
                    }
                }
            }
        }
    };
    let wall_time_ms = start.elapsed().as_millis() as u64;

    let (status, timed_out, memory_exceeded) = match exit {
        Exit::Exited(status) => {
            handle.reaped = true;
            (status, false, false)
        }
        Exit::TimedOut => (handle.terminate().await?, true, false),
        Exit::MemoryExceeded => (handle.terminate().await?, false, true),
    };
    // Descendants may still hold the pipes open
    drop(handle);

    stdin_task.abort();
    let (stdout, stdout_truncated) = drain(stdout_task).await;
    let (stderr, _) = drain(stderr_task).await;

    Ok(RunOutcome {
        stdout,
        stderr,
        exit_code: status.code(),
        signal: status.signal(),
        wall_time_ms,
        peak_memory_kb,
        timed_out,
        memory_exceeded,
        output_truncated: stdout_truncated,
    })
}

async fn drain(task: tokio::task::JoinHandle<(Vec<u8>, bool)>) -> (String, bool) {
    let abort = task.abort_handle();
    match tokio::time::timeout(PIPE_DRAIN_GRACE, task).await {
        Ok(Ok((bytes, truncated))) => (String::from_utf8_lossy(&bytes).into_owned(), truncated),
        Ok(Err(_)) => (String::new(), false),
        Err(_) => {
            abort.abort();
            (String::new(), false)
        }
    }
}

/// Read until EOF keeping at most `limit` bytes. The rest is drained and
/// discarded so the writer never blocks on a full pipe.
async fn read_capped<R>(pipe: Option<R>, limit: usize) -> (Vec<u8>, bool)
where
    R: AsyncRead + Unpin,
{
    let Some(mut pipe) = pipe else {
        return (Vec::new(), false);
    };

    let mut kept = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8192];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = limit.saturating_sub(kept.len());
                if n > room {
                    truncated = true;
                }
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
        }
    }
    (kept, truncated)
}

/// Peak resident set (`VmHWM`) of a live process, in KB
fn read_peak_memory_kb(pid: u32) -> Option<u64> {
    let status = std::fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;
    parse_vm_hwm(&status)
}

fn parse_vm_hwm(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmHWM:"))
        .and_then(|rest| rest.trim().trim_end_matches("kB").trim().parse().ok())
}
