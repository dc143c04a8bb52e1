//! Engine configuration
//!
//! Every knob is read from an environment variable once at startup. Missing
//! variables fall back to the defaults in [`crate::constants`]; malformed ones
//! are rejected.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::constants::{
    container_images, DEFAULT_COMPILE_TIME_LIMIT_MS, DEFAULT_MAX_FILE_SIZE_BYTES,
    DEFAULT_MAX_OPEN_FILES, DEFAULT_MAX_PROCESSES, DEFAULT_MAX_SOURCE_BYTES,
    DEFAULT_MEMORY_LIMIT_KB, DEFAULT_METRICS_PORT, DEFAULT_OUTPUT_LIMIT_BYTES,
    DEFAULT_READONLY_PATHS, DEFAULT_SCRATCH_ROOT, DEFAULT_SUBMISSION_CONCURRENCY, DEFAULT_TEST_WORKERS,
    DEFAULT_TIME_LIMIT_MS, MAX_TIME_LIMIT_MS,
};

/// Main engine configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub limits: LimitsConfig,
    pub sandbox: SandboxConfig,
    pub toolchain: ToolchainConfig,
    pub worker: WorkerConfig,
}

/// Resource ceilings applied to every submission
#[derive(Debug, Clone)]
pub struct LimitsConfig {
    /// Used when a request asks for 0 ms
    pub default_time_limit_ms: u64,
    /// Requests are clamped to this
    pub max_time_limit_ms: u64,
    pub memory_limit_kb: u64,
    pub max_source_bytes: usize,
    pub output_limit_bytes: usize,
    pub compile_time_limit_ms: u64,
}

/// Which isolation backend runs the untrusted code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxBackend {
    /// Local child process under rlimits and namespaces
    Process,
    /// One docker container per invocation
    Docker,
}

impl FromStr for SandboxBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "process" => Ok(SandboxBackend::Process),
            "docker" | "container" => Ok(SandboxBackend::Docker),
            _ => Err(()),
        }
    }
}

/// Isolation settings
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub backend: SandboxBackend,
    /// Parent of every per-submission scratch directory
    pub scratch_root: PathBuf,
    /// Unshare user and network namespaces before exec (process backend)
    pub isolate_network: bool,
    /// Run inside a private root with only the scratch directories writable
    /// (process backend). Required for that backend in production.
    pub isolate_filesystem: bool,
    /// Host directories visible read-only inside the private root
    pub readonly_paths: Vec<PathBuf>,
    pub max_processes: u64,
    pub max_open_files: u64,
    pub max_file_size_bytes: u64,
    /// Drop to this uid/gid before exec (process backend, needs root)
    pub run_as: Option<(u32, u32)>,
    pub docker_binary: String,
}

/// Interpreter/compiler binaries and container images per language
#[derive(Debug, Clone)]
pub struct ToolchainConfig {
    pub python: String,
    pub node: String,
    pub cxx: String,
    pub javac: String,
    pub java: String,
    pub python_image: String,
    pub javascript_image: String,
    pub cpp_image: String,
    pub java_image: String,
}

/// Log output format of the worker binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Worker process settings
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Test cases of one submission judged concurrently
    pub test_workers: usize,
    /// Submissions judged concurrently
    pub submission_concurrency: usize,
    /// 0 disables the metrics endpoint
    pub metrics_port: u16,
    /// JSON denylist replacing the built-in one
    pub denylist_path: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            limits: LimitsConfig::from_env()?,
            sandbox: SandboxConfig::from_env()?,
            toolchain: ToolchainConfig::from_env(),
            worker: WorkerConfig::from_env()?,
        })
    }
}

impl LimitsConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let limits = Self {
            default_time_limit_ms: parse_env("DEFAULT_TIME_LIMIT_MS", DEFAULT_TIME_LIMIT_MS)?,
            max_time_limit_ms: parse_env("MAX_TIME_LIMIT_MS", MAX_TIME_LIMIT_MS)?,
            memory_limit_kb: parse_env("MEMORY_LIMIT_KB", DEFAULT_MEMORY_LIMIT_KB)?,
            max_source_bytes: parse_env("MAX_SOURCE_BYTES", DEFAULT_MAX_SOURCE_BYTES)?,
            output_limit_bytes: parse_env("OUTPUT_LIMIT_BYTES", DEFAULT_OUTPUT_LIMIT_BYTES)?,
            compile_time_limit_ms: parse_env(
                "COMPILE_TIME_LIMIT_MS",
                DEFAULT_COMPILE_TIME_LIMIT_MS,
            )?,
        };

        if limits.max_time_limit_ms == 0 {
            return Err(ConfigError::InvalidValue("MAX_TIME_LIMIT_MS".to_string()));
        }
        if limits.default_time_limit_ms == 0 || limits.default_time_limit_ms > limits.max_time_limit_ms
        {
            return Err(ConfigError::InvalidValue("DEFAULT_TIME_LIMIT_MS".to_string()));
        }
        if limits.memory_limit_kb == 0 {
            return Err(ConfigError::InvalidValue("MEMORY_LIMIT_KB".to_string()));
        }

        Ok(limits)
    }

    /// Effective per-test limit for a requested value
    pub fn effective_time_limit_ms(&self, requested_ms: u64) -> u64 {
        if requested_ms == 0 {
            self.default_time_limit_ms
        } else {
            requested_ms.clamp(1, self.max_time_limit_ms)
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            default_time_limit_ms: DEFAULT_TIME_LIMIT_MS,
            max_time_limit_ms: MAX_TIME_LIMIT_MS,
            memory_limit_kb: DEFAULT_MEMORY_LIMIT_KB,
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            compile_time_limit_ms: DEFAULT_COMPILE_TIME_LIMIT_MS,
        }
    }
}

impl SandboxConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let backend = match env::var("SANDBOX_BACKEND") {
            Ok(value) => value
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SANDBOX_BACKEND".to_string()))?,
            Err(_) => SandboxBackend::Process,
        };

        let run_as = match env::var("SANDBOX_RUN_AS") {
            Ok(value) if !value.trim().is_empty() => Some(
                parse_uid_gid(&value)
                    .ok_or_else(|| ConfigError::InvalidValue("SANDBOX_RUN_AS".to_string()))?,
            ),
            _ => None,
        };

        let readonly_paths = match env::var("SANDBOX_READONLY_PATHS") {
            Ok(value) => env::split_paths(&value)
                .filter(|p| !p.as_os_str().is_empty())
                .collect(),
            Err(_) => default_readonly_paths(),
        };

        let sandbox = Self {
            backend,
            scratch_root: PathBuf::from(
                env::var("SCRATCH_ROOT").unwrap_or_else(|_| DEFAULT_SCRATCH_ROOT.to_string()),
            ),
            isolate_network: parse_env("SANDBOX_ISOLATE_NETWORK", true)?,
            isolate_filesystem: parse_env("SANDBOX_ISOLATE_FILESYSTEM", true)?,
            readonly_paths,
            max_processes: parse_env("SANDBOX_MAX_PROCESSES", DEFAULT_MAX_PROCESSES)?,
            max_open_files: parse_env("SANDBOX_MAX_OPEN_FILES", DEFAULT_MAX_OPEN_FILES)?,
            max_file_size_bytes: parse_env(
                "SANDBOX_MAX_FILE_SIZE_BYTES",
                DEFAULT_MAX_FILE_SIZE_BYTES,
            )?,
            run_as,
            docker_binary: env::var("DOCKER_BINARY").unwrap_or_else(|_| "docker".to_string()),
        };
        sandbox.check()?;
        Ok(sandbox)
    }

    /// Reject settings under which the process backend would leave the host
    /// filesystem writable
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.backend != SandboxBackend::Process {
            return Ok(());
        }
        if !self.isolate_filesystem {
            return Err(ConfigError::InvalidValue("SANDBOX_ISOLATE_FILESYSTEM".to_string()));
        }
        if self.readonly_paths.iter().any(|p| !p.is_absolute()) {
            return Err(ConfigError::InvalidValue("SANDBOX_READONLY_PATHS".to_string()));
        }
        // Scratch binds are created inside the private root, never on a
        // read-only host bind
        let scratch: &Path = &self.scratch_root;
        if !scratch.is_absolute()
            || self.readonly_paths.iter().any(|p| scratch.starts_with(p))
            || scratch.starts_with("/dev")
        {
            return Err(ConfigError::InvalidValue("SCRATCH_ROOT".to_string()));
        }
        Ok(())
    }
}

fn default_readonly_paths() -> Vec<PathBuf> {
    DEFAULT_READONLY_PATHS.iter().map(PathBuf::from).collect()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: SandboxBackend::Process,
            scratch_root: PathBuf::from(DEFAULT_SCRATCH_ROOT),
            isolate_network: true,
            isolate_filesystem: true,
            readonly_paths: default_readonly_paths(),
            max_processes: DEFAULT_MAX_PROCESSES,
            max_open_files: DEFAULT_MAX_OPEN_FILES,
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            run_as: None,
            docker_binary: "docker".to_string(),
        }
    }
}

impl ToolchainConfig {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            python: env::var("PYTHON_BIN").unwrap_or(defaults.python),
            node: env::var("NODE_BIN").unwrap_or(defaults.node),
            cxx: env::var("CXX_BIN").unwrap_or(defaults.cxx),
            javac: env::var("JAVAC_BIN").unwrap_or(defaults.javac),
            java: env::var("JAVA_BIN").unwrap_or(defaults.java),
            python_image: env::var("PYTHON_IMAGE").unwrap_or(defaults.python_image),
            javascript_image: env::var("JAVASCRIPT_IMAGE").unwrap_or(defaults.javascript_image),
            cpp_image: env::var("CPP_IMAGE").unwrap_or(defaults.cpp_image),
            java_image: env::var("JAVA_IMAGE").unwrap_or(defaults.java_image),
        }
    }
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            node: "node".to_string(),
            cxx: "g++".to_string(),
            javac: "javac".to_string(),
            java: "java".to_string(),
            python_image: container_images::PYTHON.to_string(),
            javascript_image: container_images::JAVASCRIPT.to_string(),
            cpp_image: container_images::CPP.to_string(),
            java_image: container_images::JAVA.to_string(),
        }
    }
}

impl WorkerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("pretty") | Ok("text") | Err(_) => LogFormat::Pretty,
            Ok(_) => return Err(ConfigError::InvalidValue("LOG_FORMAT".to_string())),
        };

        let worker = Self {
            test_workers: parse_env("TEST_WORKERS", DEFAULT_TEST_WORKERS)?,
            submission_concurrency: parse_env(
                "SUBMISSION_CONCURRENCY",
                DEFAULT_SUBMISSION_CONCURRENCY,
            )?,
            metrics_port: parse_env("METRICS_PORT", DEFAULT_METRICS_PORT)?,
            denylist_path: env::var("DENYLIST_PATH").ok().map(PathBuf::from),
            log_format,
        };

        if worker.test_workers == 0 {
            return Err(ConfigError::InvalidValue("TEST_WORKERS".to_string()));
        }
        if worker.submission_concurrency == 0 {
            return Err(ConfigError::InvalidValue("SUBMISSION_CONCURRENCY".to_string()));
        }

        Ok(worker)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            test_workers: DEFAULT_TEST_WORKERS,
            submission_concurrency: DEFAULT_SUBMISSION_CONCURRENCY,
            metrics_port: DEFAULT_METRICS_PORT,
            denylist_path: None,
            log_format: LogFormat::Pretty,
        }
    }
}

/// Read `key` and parse it, or fall back to `default` when unset.
fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        Err(_) => Ok(default),
    }
}

/// `uid:gid`
fn parse_uid_gid(value: &str) -> Option<(u32, u32)> {
    let (uid, gid) = value.trim().split_once(':')?;
    Some((uid.parse().ok()?, gid.parse().ok()?))
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),

    #[error("Failed to load denylist from {path}: {reason}")]
    Denylist { path: String, reason: String },
}
