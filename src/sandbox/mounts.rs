//! Private root filesystem for the process backend.
//!
//! A [`MountPlan`] is computed in the parent and applied in the child once it
//! has entered fresh user and mount namespaces. The child ends up in a tmpfs
//! root holding read-only binds of the system directories, a few device
//! nodes, a private `/tmp`, the build directory and (for a test case) its
//! writable case directory. No other part of the host filesystem is
//! reachable, in particular no other scratch directory.
//!
//! Build and case directories keep their host paths inside the new root, so
//! resolved command arguments need no translation.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStringExt;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::sys::statvfs::{statvfs, FsFlags};
use nix::unistd::pivot_root;

use crate::constants::{SANDBOX_DEVICES, SANDBOX_ROOT_TMPFS_OPTIONS, SANDBOX_TMP_TMPFS_OPTIONS};

/// Flags the kernel locks on mounts inherited into a user namespace; a
/// remount must repeat them
const LOCKED_FLAGS: [(FsFlags, MsFlags); 6] = [
    (FsFlags::ST_NOSUID, MsFlags::MS_NOSUID),
    (FsFlags::ST_NODEV, MsFlags::MS_NODEV),
    (FsFlags::ST_NOEXEC, MsFlags::MS_NOEXEC),
    (FsFlags::ST_NOATIME, MsFlags::MS_NOATIME),
    (FsFlags::ST_NODIRATIME, MsFlags::MS_NODIRATIME),
    (FsFlags::ST_RELATIME, MsFlags::MS_RELATIME),
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum MountStep {
    Tmpfs {
        target: PathBuf,
        options: &'static str,
    },
    /// Recursive bind of a directory
    BindDir {
        source: PathBuf,
        target: PathBuf,
        writable: bool,
    },
    /// Bind of a single device node
    BindFile { source: PathBuf, target: PathBuf },
    /// Host symlink recreated as is (`/bin -> usr/bin`)
    Symlink { link: PathBuf, points_to: PathBuf },
    /// Mount pulled in under a read-only bind
    ReadOnly { target: PathBuf },
}

/// Mount steps of one sandboxed invocation
#[derive(Debug, Clone)]
pub(crate) struct MountPlan {
    root: PathBuf,
    steps: Vec<MountStep>,
    cwd: PathBuf,
}

impl MountPlan {
    /// Plan a root on the empty directory `root`.
    ///
    /// `mountinfo` is the text of `/proc/self/mountinfo`; mounts found below
    /// a read-only path are remounted read-only too. Missing read-only paths
    /// are skipped.
    pub(crate) fn build(
        root: &Path,
        readonly_paths: &[PathBuf],
        build_dir: &Path,
        case_dir: Option<&Path>,
        mountinfo: &str,
    ) -> io::Result<Self> {
        let all_absolute = std::iter::once(root)
            .chain(std::iter::once(build_dir))
            .chain(case_dir)
            .chain(readonly_paths.iter().map(PathBuf::as_path))
            .all(Path::is_absolute);
        if !all_absolute {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "sandbox mount paths must be absolute",
            ));
        }

        let inside = |path: &Path| root.join(path.strip_prefix("/").unwrap_or(path));
        let mut steps = Vec::new();
        let mut bound: Vec<&Path> = Vec::new();

        for path in readonly_paths {
            let meta = match fs::symlink_metadata(path) {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            if meta.file_type().is_symlink() {
                steps.push(MountStep::Symlink {
                    link: inside(path),
                    points_to: fs::read_link(path)?,
                });
            } else if meta.is_dir() {
                steps.push(MountStep::BindDir {
                    source: path.clone(),
                    target: inside(path),
                    writable: false,
                });
                bound.push(path);
            }
        }

        for mount_point in mount_points(mountinfo) {
            let nested = bound
                .iter()
                .any(|dir| mount_point.as_path() != *dir && mount_point.starts_with(dir));
            if nested {
                steps.push(MountStep::ReadOnly {
                    target: inside(&mount_point),
                });
            }
        }

        for device in SANDBOX_DEVICES.iter().map(Path::new) {
            if device.exists() {
                steps.push(MountStep::BindFile {
                    source: device.to_path_buf(),
                    target: inside(device),
                });
            }
        }

        // Before the scratch binds, which usually live under /tmp
        steps.push(MountStep::Tmpfs {
            target: inside(Path::new("/tmp")),
            options: SANDBOX_TMP_TMPFS_OPTIONS,
        });
        steps.push(MountStep::BindDir {
            source: build_dir.to_path_buf(),
            target: inside(build_dir),
            writable: case_dir.is_none(),
        });
        if let Some(case_dir) = case_dir {
            steps.push(MountStep::BindDir {
                source: case_dir.to_path_buf(),
                target: inside(case_dir),
                writable: true,
            });
        }

        Ok(Self {
            root: root.to_path_buf(),
            steps,
            cwd: case_dir.unwrap_or(build_dir).to_path_buf(),
        })
    }

    /// Build the root and switch into it. Runs in the child between fork and
    /// exec, inside a mount namespace owned by its own user namespace.
    pub(crate) fn apply(&self) -> io::Result<()> {
        mount(
            None::<&str>,
            "/",
            None::<&str>,
            MsFlags::MS_REC | MsFlags::MS_PRIVATE,
            None::<&str>,
        )?;
        mount(
            Some("tmpfs"),
            &self.root,
            Some("tmpfs"),
            MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
            Some(SANDBOX_ROOT_TMPFS_OPTIONS),
        )?;

        for step in &self.steps {
            match step {
                MountStep::Tmpfs { target, options } => {
                    fs::create_dir_all(target)?;
                    mount(
                        Some("tmpfs"),
                        target,
                        Some("tmpfs"),
                        MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
                        Some(*options),
                    )?;
                }
                MountStep::BindDir {
                    source,
                    target,
                    writable,
                } => {
                    fs::create_dir_all(target)?;
                    mount(
                        Some(source),
                        target,
                        None::<&str>,
                        MsFlags::MS_BIND | MsFlags::MS_REC,
                        None::<&str>,
                    )?;
                    if !writable {
                        remount_read_only(target)?;
                    }
                }
                MountStep::BindFile { source, target } => {
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::File::create(target)?;
                    mount(
                        Some(source),
                        target,
                        None::<&str>,
                        MsFlags::MS_BIND,
                        None::<&str>,
                    )?;
                }
                MountStep::Symlink { link, points_to } => {
                    if let Some(parent) = link.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    symlink(points_to, link)?;
                }
                MountStep::ReadOnly { target } => remount_read_only(target)?,
            }
        }

        // The skeleton itself takes no writes
        mount(
            None::<&str>,
            &self.root,
            None::<&str>,
            MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY | MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
            None::<&str>,
        )?;

        std::env::set_current_dir(&self.root)?;
        pivot_root(".", ".")?;
        umount2(".", MntFlags::MNT_DETACH)?;
        std::env::set_current_dir(&self.cwd)
    }
}

fn remount_read_only(target: &Path) -> io::Result<()> {
    let current = statvfs(target)?.flags();
    let flags = LOCKED_FLAGS
        .iter()
        .filter(|(st, _)| current.contains(*st))
        .fold(
            MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
            |flags, (_, ms)| flags | *ms,
        );
    mount(None::<&str>, target, None::<&str>, flags, None::<&str>)?;
    Ok(())
}

/// Mount points listed in `/proc/self/mountinfo`, in mount order
fn mount_points(mountinfo: &str) -> Vec<PathBuf> {
    mountinfo
        .lines()
        .filter_map(|line| line.split(' ').nth(4))
        .map(unescape_octal)
        .collect()
}

/// Undo the `\040` style escaping of mountinfo fields
fn unescape_octal(field: &str) -> PathBuf {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let escape = bytes.get(i + 1..i + 4).filter(|digits| {
            bytes[i] == b'\\' && digits.iter().all(|d| (b'0'..=b'7').contains(d))
        });
        match escape {
            Some(digits) => {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                out.push(value as u8);
                i += 4;
            }
            None => {
                out.push(bytes[i]);
                i += 1;
            }
        }
    }
    PathBuf::from(OsString::from_vec(out))
}
