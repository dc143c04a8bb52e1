//! Per-submission scratch directories.
//!
//! Layout under `<SCRATCH_ROOT>/<random token>/`:
//!
//! ```text
//! build/      harness sources and compiler output, read-only once sealed
//! rootfs/     empty mount point of the process backend's private root
//! case-0/     empty working directory of test case 0
//! case-1/     ...
//! ```
//!
//! The token comes from the OS CSPRNG so concurrent passes can neither
//! collide nor guess each other's paths. Both [`Scratch`] and [`CaseDir`]
//! remove their directory when dropped.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use nix::unistd::{chown, Gid, Uid};
use tempfile::TempDir;

use crate::constants::SCRATCH_TOKEN_LENGTH;
use crate::error::SandboxError;
use crate::utils::crypto::generate_secure_token;

/// Private directory of one judging pass
#[derive(Debug)]
pub struct Scratch {
    dir: TempDir,
    build_dir: PathBuf,
    rootfs_dir: PathBuf,
    run_as: Option<(u32, u32)>,
}

impl Scratch {
    /// Create `<root>/<token>` with `build/` inside
    pub fn create(root: &Path, run_as: Option<(u32, u32)>) -> Result<Self, SandboxError> {
        fs::create_dir_all(root).map_err(SandboxError::Scratch)?;

        // Another user must be able to traverse, not list
        let mode = if run_as.is_some() { 0o711 } else { 0o700 };
        let token = generate_secure_token(SCRATCH_TOKEN_LENGTH);
        let dir = tempfile::Builder::new()
            .prefix(&token)
            .rand_bytes(0)
            .permissions(fs::Permissions::from_mode(mode))
            .tempdir_in(root)
            .map_err(SandboxError::Scratch)?;

        let build_dir = dir.path().join("build");
        fs::create_dir(&build_dir).map_err(SandboxError::Scratch)?;
        set_mode(&build_dir, 0o700)?;

        let rootfs_dir = dir.path().join("rootfs");
        fs::create_dir(&rootfs_dir).map_err(SandboxError::Scratch)?;

        Ok(Self {
            dir,
            build_dir,
            rootfs_dir,
            run_as,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub fn rootfs_dir(&self) -> &Path {
        &self.rootfs_dir
    }

    /// Write one harness file into `build/`
    pub fn write_build_file(&self, name: &str, contents: &str) -> Result<(), SandboxError> {
        fs::write(self.build_dir.join(name), contents).map_err(SandboxError::Scratch)
    }

    /// Make `build/` read-only (and world-readable when running as another
    /// user) so test cases cannot tamper with the compiled program
    pub fn seal_build(&self) -> Result<(), SandboxError> {
        let dir_mode = if self.run_as.is_some() { 0o555 } else { 0o500 };
        set_tree_mode(&self.build_dir, dir_mode, false).map_err(SandboxError::Scratch)
    }

    /// Fresh empty working directory for test case `index`
    pub fn case_dir(&self, index: usize) -> Result<CaseDir, SandboxError> {
        let path = self.dir.path().join(format!("case-{}", index));
        fs::create_dir(&path).map_err(SandboxError::Scratch)?;
        set_mode(&path, 0o700)?;

        if let Some((uid, gid)) = self.run_as {
            chown(&path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))
                .map_err(|e| SandboxError::Scratch(e.into()))?;
        }

        Ok(CaseDir { path })
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        // TempDir cannot unlink entries of a sealed directory
        if let Err(e) = set_tree_mode(&self.build_dir, 0o700, true) {
            tracing::warn!(path = %self.build_dir.display(), error = %e, "Failed to unseal build dir");
        }
    }
}

/// Working directory of one test case
#[derive(Debug)]
pub struct CaseDir {
    path: PathBuf,
}

impl CaseDir {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CaseDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove case dir");
            }
        }
    }
}

fn set_mode(path: &Path, mode: u32) -> Result<(), SandboxError> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(SandboxError::Scratch)
}

/// Apply `dir_mode` to every directory under `root` (inclusive). Files keep
/// their execute bits; the owner write bit is set or cleared with `writable`.
fn set_tree_mode(root: &Path, dir_mode: u32, writable: bool) -> std::io::Result<()> {
    // Children first while the directory is still writable/listable
    fs::set_permissions(root, fs::Permissions::from_mode(dir_mode | 0o500))?;
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        let meta = entry.metadata()?;
        if meta.is_dir() {
            set_tree_mode(&path, dir_mode, writable)?;
        } else {
            let mode = meta.permissions().mode() & 0o555;
            let mode = if writable { mode | 0o600 } else { mode | 0o444 };
            fs::set_permissions(&path, fs::Permissions::from_mode(mode))?;
        }
    }
    fs::set_permissions(root, fs::Permissions::from_mode(dir_mode))
}
