//! Engine-wide constants
//!
//! Defaults for every configuration knob, grouped by purpose.

// =============================================================================
// LIMIT DEFAULTS
// =============================================================================

/// Per-test wall-clock limit when the request carries 0
pub const DEFAULT_TIME_LIMIT_MS: u64 = 2000;

/// Upper bound a request may ask for
pub const MAX_TIME_LIMIT_MS: u64 = 10_000;

/// Memory ceiling per sandboxed process (256 MB)
pub const DEFAULT_MEMORY_LIMIT_KB: u64 = 256 * 1024;

/// Largest accepted submission
pub const DEFAULT_MAX_SOURCE_BYTES: usize = 50_000;

/// Combined cap on captured stdout (stderr has its own cap of the same size)
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1024 * 1024;

/// Wall-clock limit for the compile / syntax-check step
pub const DEFAULT_COMPILE_TIME_LIMIT_MS: u64 = 30_000;

/// Memory ceiling of the compile step (1 GB); compilers need far more than
/// the programs they build
pub const COMPILE_MEMORY_LIMIT_KB: u64 = 1024 * 1024;

/// Runtimes bounded by a heap flag are only killed once resident memory
/// passes this multiple of the limit
pub const RUNTIME_MEMORY_HEADROOM: u64 = 2;

/// Characters of stderr kept in error details
pub const ERROR_DETAIL_MAX_CHARS: usize = 500;

/// Characters of compiler output kept in a compile error message
pub const COMPILE_OUTPUT_MAX_CHARS: usize = 4000;

// =============================================================================
// SANDBOX DEFAULTS
// =============================================================================

/// Root under which each judging pass creates its private directory
pub const DEFAULT_SCRATCH_ROOT: &str = "/tmp/codejudge";

/// Length of the random scratch directory name
pub const SCRATCH_TOKEN_LENGTH: usize = 32;

/// RLIMIT_NPROC for sandboxed processes. Counted per real uid, so keep it
/// generous when the sandbox runs as the worker's own user.
pub const DEFAULT_MAX_PROCESSES: u64 = 256;

/// RLIMIT_NOFILE for sandboxed processes
pub const DEFAULT_MAX_OPEN_FILES: u64 = 64;

/// RLIMIT_FSIZE for sandboxed processes (16 MB)
pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 16 * 1024 * 1024;

/// Interval between peak-memory samples
pub const MEMORY_SAMPLE_INTERVAL_MS: u64 = 5;

/// PATH handed to sandboxed processes
pub const SANDBOX_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Host directories visible read-only inside the process backend's root
pub const DEFAULT_READONLY_PATHS: &[&str] = &[
    "/usr", "/bin", "/sbin", "/lib", "/lib32", "/lib64", "/libx32", "/etc", "/opt",
];

/// Device nodes bound into the process backend's root
pub const SANDBOX_DEVICES: &[&str] = &["/dev/null", "/dev/zero", "/dev/random", "/dev/urandom"];

/// tmpfs holding the process backend's root skeleton
pub const SANDBOX_ROOT_TMPFS_OPTIONS: &str = "size=1m,mode=0755";

/// Private `/tmp` of every sandboxed process
pub const SANDBOX_TMP_TMPFS_OPTIONS: &str = "size=64m,mode=1777";

/// Mount point of the build directory inside containers
pub const CONTAINER_BUILD_DIR: &str = "/build";

/// Working directory of a test case inside containers
pub const CONTAINER_CASE_DIR: &str = "/case";

/// Extra wall-clock allowance for container start-up
pub const CONTAINER_STARTUP_GRACE_MS: u64 = 1000;

/// Exit status docker reports for a SIGKILLed container
pub const CONTAINER_KILLED_EXIT_CODE: i32 = 137;

// =============================================================================
// WORKER DEFAULTS
// =============================================================================

/// Test cases of one submission run concurrently
pub const DEFAULT_TEST_WORKERS: usize = 1;

/// Submissions judged concurrently by the worker binary
pub const DEFAULT_SUBMISSION_CONCURRENCY: usize = 4;

/// Prometheus port; 0 disables the endpoint
pub const DEFAULT_METRICS_PORT: u16 = 9091;

// =============================================================================
// SUPPORTED LANGUAGES
// =============================================================================

/// Language identifiers
pub mod languages {
    pub const PYTHON: &str = "python";
    pub const JAVASCRIPT: &str = "javascript";
    pub const CPP: &str = "cpp";
    pub const JAVA: &str = "java";

    /// All supported language identifiers
    pub const ALL: &[&str] = &[PYTHON, JAVASCRIPT, CPP, JAVA];
}

/// Container images for each language
pub mod container_images {
    pub const PYTHON: &str = "python:3.12-slim";
    pub const JAVASCRIPT: &str = "node:20-slim";
    pub const CPP: &str = "gcc:13";
    pub const JAVA: &str = "eclipse-temurin:21-jdk";
}
