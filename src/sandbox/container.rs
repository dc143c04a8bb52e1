//! Docker backend.
//!
//! Each invocation is a fresh `docker run` with no network, no capabilities,
//! a read-only root filesystem and cgroup limits on memory and pids. The
//! build directory is bind-mounted at `/build` (read-only outside the
//! compile step) and the test case directory at `/case`.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::{supervise, ExecutionHandle, RunOutcome, RunSpec, Sandbox};
use crate::config::SandboxConfig;
use crate::constants::{
    CONTAINER_BUILD_DIR, CONTAINER_CASE_DIR, CONTAINER_KILLED_EXIT_CODE,
    CONTAINER_STARTUP_GRACE_MS,
};
use crate::error::SandboxError;
use crate::utils::crypto::generate_secure_token;

/// Exit status of the docker client itself failing (daemon, image, flags)
const DOCKER_CLIENT_ERROR_EXIT_CODE: i32 = 125;

/// Runs submissions in throwaway Docker containers
#[derive(Debug, Clone)]
pub struct ContainerSandbox {
    config: SandboxConfig,
}

impl ContainerSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Pull an image unless it is already present. Best effort: a failed
    /// pull is logged and the first run reports the real error.
    pub async fn ensure_image(&self, image: &str) {
        let present = Command::new(&self.config.docker_binary)
            .args(["image", "inspect", image])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false);
        if present {
            tracing::debug!(image = %image, "Docker image already present");
            return;
        }

        tracing::info!(image = %image, "Pulling Docker image");
        match Command::new(&self.config.docker_binary)
            .args(["pull", image])
            .stdin(Stdio::null())
            .output()
            .await
        {
            Ok(output) if output.status.success() => {
                tracing::info!(image = %image, "Docker image pulled");
            }
            Ok(output) => {
                tracing::warn!(
                    image = %image,
                    stderr = %String::from_utf8_lossy(&output.stderr),
                    "docker pull failed"
                );
            }
            Err(e) => tracing::warn!(image = %image, error = %e, "Failed to run docker pull"),
        }
    }

    fn docker_args(&self, spec: &RunSpec, name: &str) -> Result<Vec<String>, SandboxError> {
        let limits = &spec.limits;
        let cpu_secs = spec.time_limit_ms.div_ceil(1000) + 1;
        let (uid, gid) = self.config.run_as.unwrap_or_else(|| {
            (
                nix::unistd::getuid().as_raw(),
                nix::unistd::getgid().as_raw(),
            )
        });

        let mut args: Vec<String> = vec![
            "run".into(),
            "--rm".into(),
            "-i".into(),
            "--name".into(),
            name.to_string(),
        ];

        // ── Resource constraints ──────────────────────────────
        args.push(format!("--memory={}k", limits.memory_kb));
        args.push(format!("--memory-swap={}k", limits.memory_kb));
        args.push(format!("--pids-limit={}", limits.max_processes));
        args.push(format!("--ulimit=cpu={}:{}", cpu_secs, cpu_secs + 1));
        args.push(format!(
            "--ulimit=nofile={}:{}",
            limits.max_open_files, limits.max_open_files
        ));
        args.push(format!(
            "--ulimit=fsize={}:{}",
            limits.max_file_size_bytes, limits.max_file_size_bytes
        ));
        args.push("--ulimit=core=0:0".into());

        // ── Isolation ─────────────────────────────────────────
        args.push("--network=none".into());
        args.push("--cap-drop=ALL".into());
        args.push("--security-opt=no-new-privileges".into());
        args.push("--read-only".into());
        args.push("--tmpfs=/tmp:rw,nosuid,size=64m".into());
        args.push("--user".into());
        args.push(format!("{}:{}", uid, gid));
        args.push("-e".into());
        args.push("HOME=/tmp".into());

        // ── Volumes ───────────────────────────────────────────
        let build_dir = canonical(&spec.build_dir)?;
        args.push("-v".into());
        match &spec.case_dir {
            Some(case_dir) => {
                args.push(format!("{}:{}:ro", build_dir, CONTAINER_BUILD_DIR));
                args.push("-v".into());
                args.push(format!("{}:{}", canonical(case_dir)?, CONTAINER_CASE_DIR));
                args.push("-w".into());
                args.push(CONTAINER_CASE_DIR.into());
            }
            None => {
                args.push(format!("{}:{}", build_dir, CONTAINER_BUILD_DIR));
                args.push("-w".into());
                args.push(CONTAINER_BUILD_DIR.into());
            }
        }

        // ── Image and command ─────────────────────────────────
        args.push(spec.image.clone());
        let inside = Path::new(CONTAINER_BUILD_DIR);
        args.push(spec.command.program.resolve(inside));
        args.extend(spec.command.args.iter().map(|arg| arg.resolve(inside)));

        Ok(args)
    }
}

#[async_trait]
impl Sandbox for ContainerSandbox {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn run(&self, spec: &RunSpec) -> Result<RunOutcome, SandboxError> {
        let name = format!("judge-{}", generate_secure_token(16));
        let args = self.docker_args(spec, &name)?;

        tracing::debug!(image = %spec.image, container = %name, "Spawning sandbox container");

        let child = Command::new(&self.config.docker_binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SandboxError::Spawn {
                program: self.config.docker_binary.clone(),
                source,
            })?;
        let handle = ExecutionHandle::container(child, self.config.docker_binary.clone(), name);

        let time_limit = Duration::from_millis(spec.time_limit_ms + CONTAINER_STARTUP_GRACE_MS);
        let mut outcome = supervise(handle, spec.stdin.clone(), time_limit, &spec.limits, false).await?;

        match outcome.exit_code {
            Some(DOCKER_CLIENT_ERROR_EXIT_CODE) if !outcome.timed_out => {
                return Err(SandboxError::Container(outcome.stderr.trim().to_string()));
            }
            // The cgroup OOM killer is the only SIGKILL source we did not send
            Some(CONTAINER_KILLED_EXIT_CODE) if !outcome.timed_out => {
                outcome.memory_exceeded = true;
            }
            _ => {}
        }
        Ok(outcome)
    }
}

fn canonical(path: &Path) -> Result<String, SandboxError> {
    path.canonicalize()
        .map(|p| p.display().to_string())
        .map_err(SandboxError::Scratch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{CommandArg, CommandSpec, ResourceLimits};

    fn spec(build: &Path, case: Option<&Path>) -> RunSpec {
        RunSpec {
            image: "python:3.12-slim".into(),
            command: CommandSpec::new(CommandArg::lit("python3"))
                .lit("-E")
                .arg(CommandArg::build("main.py")),
            stdin: Vec::new(),
            build_dir: build.to_path_buf(),
            case_dir: case.map(Path::to_path_buf),
            rootfs_dir: build.join("rootfs"),
            time_limit_ms: 2000,
            limits: ResourceLimits {
                memory_kb: 262_144,
                limit_address_space: true,
                output_bytes: 1024,
                max_processes: 64,
                max_open_files: 32,
                max_file_size_bytes: 4096,
            },
        }
    }

    fn sandbox() -> ContainerSandbox {
        ContainerSandbox::new(SandboxConfig {
            run_as: Some((65534, 65534)),
            ..SandboxConfig::default()
        })
    }

    #[test]
    fn test_run_args_lock_down_container() {
        let build = tempfile::tempdir().unwrap();
        let case = tempfile::tempdir().unwrap();
        let args = sandbox()
            .docker_args(&spec(build.path(), Some(case.path())), "judge-abc")
            .unwrap();

        for expected in [
            "--network=none",
            "--cap-drop=ALL",
            "--read-only",
            "--memory=262144k",
            "--memory-swap=262144k",
            "--pids-limit=64",
            "--ulimit=cpu=3:4",
            "65534:65534",
        ] {
            assert!(args.iter().any(|a| a == expected), "missing {}", expected);
        }

        let build_mount = format!("{}:/build:ro", build.path().canonicalize().unwrap().display());
        assert!(args.contains(&build_mount));
        let tail: Vec<&str> = args.iter().rev().take(4).rev().map(String::as_str).collect();
        assert_eq!(tail, ["python:3.12-slim", "python3", "-E", "/build/main.py"]);
    }

    #[test]
    fn test_compile_step_mounts_build_writable() {
        let build = tempfile::tempdir().unwrap();
        let args = sandbox().docker_args(&spec(build.path(), None), "judge-abc").unwrap();

        let build_mount = format!("{}:/build", build.path().canonicalize().unwrap().display());
        assert!(args.contains(&build_mount));
        let workdir = args.iter().position(|a| a == "-w").unwrap();
        assert_eq!(args[workdir + 1], "/build");
    }
}
