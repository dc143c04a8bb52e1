//! Local process backend.
//!
//! The child runs in its own process group with a cleared environment.
//! Between fork and exec it optionally drops to an unprivileged uid/gid,
//! unshares a user namespace plus a network namespace (leaving it with only
//! a downed loopback interface) and a mount namespace in which it pivots
//! into a private root (see [`super::mounts`]), then applies rlimits.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use nix::sched::{unshare, CloneFlags};
use nix::sys::prctl;
use nix::sys::resource::{getrlimit, setrlimit, Resource};
use nix::unistd::{getegid, geteuid, setgid, setgroups, setuid, Gid, Uid};
use tokio::process::Command;

use super::mounts::MountPlan;
use super::{supervise, ExecutionHandle, RunOutcome, RunSpec, Sandbox};
use crate::config::SandboxConfig;
use crate::constants::SANDBOX_PATH;
use crate::error::SandboxError;

/// Runs submissions as local child processes
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    config: SandboxConfig,
}

impl ProcessSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn run(&self, spec: &RunSpec) -> Result<RunOutcome, SandboxError> {
        let program = spec.command.program.resolve(&spec.build_dir);
        let args: Vec<String> = spec
            .command
            .args
            .iter()
            .map(|arg| arg.resolve(&spec.build_dir))
            .collect();
        let cwd = spec.case_dir.as_deref().unwrap_or(&spec.build_dir);

        tracing::trace!(program = %program, args = ?args, cwd = %cwd.display(), "Spawning sandboxed process");

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .current_dir(cwd)
            .env_clear()
            .env("PATH", SANDBOX_PATH)
            .env("HOME", cwd)
            .env("LANG", "C.UTF-8")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0);

        let confinement = self
            .confinement(spec)
            .map_err(|source| SandboxError::Spawn {
                program: program.clone(),
                source,
            })?;

        // SAFETY: the closure runs between fork and exec. Everything it needs
        // was computed before the fork; it only issues syscalls on those
        // prepared values (setuid, unshare, id map writes, mount, setrlimit).
        unsafe {
            cmd.pre_exec(move || confinement.enter());
        }

        let child = cmd
            .spawn()
            .map_err(|source| SandboxError::Spawn { program, source })?;
        let handle = ExecutionHandle::process_group(child);

        supervise(
            handle,
            spec.stdin.clone(),
            Duration::from_millis(spec.time_limit_ms),
            &spec.limits,
            true,
        )
        .await
    }
}

impl ProcessSandbox {
    fn confinement(&self, spec: &RunSpec) -> io::Result<Confinement> {
        let mut namespaces = CloneFlags::empty();
        if self.config.isolate_network {
            namespaces |= CloneFlags::CLONE_NEWNET;
        }

        let mut mounts = None;
        let mut id_maps = None;
        if self.config.isolate_filesystem {
            let mountinfo = std::fs::read_to_string("/proc/self/mountinfo")?;
            mounts = Some(MountPlan::build(
                &spec.rootfs_dir,
                &self.config.readonly_paths,
                &spec.build_dir,
                spec.case_dir.as_deref(),
                &mountinfo,
            )?);
            namespaces |= CloneFlags::CLONE_NEWNS;

            let (uid, gid) = self
                .config
                .run_as
                .unwrap_or_else(|| (geteuid().as_raw(), getegid().as_raw()));
            id_maps = Some(IdMaps::identity(uid, gid));
        }
        if !namespaces.is_empty() {
            // Unprivileged callers need the user namespace to get the others
            namespaces |= CloneFlags::CLONE_NEWUSER;
        }

        Ok(Confinement {
            rlimits: Rlimits::for_spec(spec),
            run_as: self.config.run_as,
            namespaces,
            id_maps,
            mounts,
        })
    }
}

/// Everything the child does between fork and exec, prepared in the parent
struct Confinement {
    rlimits: Rlimits,
    run_as: Option<(u32, u32)>,
    namespaces: CloneFlags,
    id_maps: Option<IdMaps>,
    mounts: Option<MountPlan>,
}

impl Confinement {
    fn enter(&self) -> io::Result<()> {
        if let Some((uid, gid)) = self.run_as {
            let gid = Gid::from_raw(gid);
            setgroups(&[gid])?;
            setgid(gid)?;
            setuid(Uid::from_raw(uid))?;
            // Changing uid made /proc/self root-owned; the id maps live there
            if self.id_maps.is_some() {
                prctl::set_dumpable(true)?;
            }
        }
        if !self.namespaces.is_empty() {
            unshare(self.namespaces)?;
        }
        if let Some(maps) = &self.id_maps {
            maps.write()?;
        }
        if let Some(mounts) = &self.mounts {
            mounts.apply()?;
        }
        self.rlimits.apply()?;
        Ok(())
    }
}

/// Maps the sandbox uid/gid onto itself inside the new user namespace
#[derive(Debug, Clone, PartialEq, Eq)]
struct IdMaps {
    uid_map: String,
    gid_map: String,
}

impl IdMaps {
    fn identity(uid: u32, gid: u32) -> Self {
        Self {
            uid_map: format!("{} {} 1\n", uid, uid),
            gid_map: format!("{} {} 1\n", gid, gid),
        }
    }

    fn write(&self) -> io::Result<()> {
        // Unprivileged gid maps require setgroups to be off
        std::fs::write("/proc/self/setgroups", "deny")?;
        std::fs::write("/proc/self/uid_map", &self.uid_map)?;
        std::fs::write("/proc/self/gid_map", &self.gid_map)
    }
}

/// rlimit values computed before fork
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rlimits {
    cpu_secs: u64,
    address_space_bytes: Option<u64>,
    processes: u64,
    open_files: u64,
    file_size_bytes: u64,
}

impl Rlimits {
    fn for_spec(spec: &RunSpec) -> Self {
        Self {
            // Whole seconds, one spare so the wall clock normally fires first
            cpu_secs: spec.time_limit_ms.div_ceil(1000) + 1,
            address_space_bytes: spec
                .limits
                .limit_address_space
                .then(|| spec.limits.memory_kb.saturating_mul(1024)),
            processes: spec.limits.max_processes,
            open_files: spec.limits.max_open_files,
            file_size_bytes: spec.limits.max_file_size_bytes,
        }
    }

    fn apply(&self) -> nix::Result<()> {
        // SIGXCPU at the soft limit, SIGKILL one second later
        lower(Resource::RLIMIT_CPU, self.cpu_secs, self.cpu_secs + 1)?;
        if let Some(bytes) = self.address_space_bytes {
            lower(Resource::RLIMIT_AS, bytes, bytes)?;
        }
        lower(Resource::RLIMIT_NPROC, self.processes, self.processes)?;
        lower(Resource::RLIMIT_NOFILE, self.open_files, self.open_files)?;
        lower(Resource::RLIMIT_FSIZE, self.file_size_bytes, self.file_size_bytes)?;
        lower(Resource::RLIMIT_CORE, 0, 0)
    }
}

/// Set a limit without trying to raise the existing hard limit
fn lower(resource: Resource, soft: u64, hard: u64) -> nix::Result<()> {
    let (_, current_hard) = getrlimit(resource)?;
    let hard = hard.min(current_hard);
    setrlimit(resource, soft.min(hard), hard)
}
