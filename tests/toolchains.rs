//! End-to-end judging against the real toolchains on `PATH`.
//!
//! Each test skips itself when the interpreter or compiler it needs is not
//! installed. The process backend runs without namespaces here so the tests
//! also work inside unprivileged containers; the isolation tests enable them
//! and skip when the host refuses.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use codejudge::config::Config;
use codejudge::harness::LanguageRegistry;
use codejudge::judge::Judge;
use codejudge::sandbox::ProcessSandbox;
use codejudge::validator::Validator;
use codejudge_common::{
    EntryPoint, ErrorKind, JudgeResponse, Param, ProblemContract, SubmissionRequest,
    SubmissionStatus, TestCase, ValueType, Verdict,
};

fn available(program: &str) -> bool {
    std::process::Command::new(program)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

macro_rules! require {
    ($($program:expr),+) => {
        $(
            if !available($program) {
                eprintln!("skipping: `{}` not found on PATH", $program);
                return;
            }
        )+
    };
}

fn config(scratch_root: &Path) -> Config {
    let mut config = Config::default();
    config.sandbox.scratch_root = scratch_root.to_path_buf();
    config.sandbox.isolate_network = false;
    config.sandbox.isolate_filesystem = false;
    // Threads count against RLIMIT_NPROC for the whole uid
    config.sandbox.max_processes = 16_384;
    config.worker.test_workers = 2;
    config
}

fn judge(scratch_root: &Path) -> Judge {
    let config = config(scratch_root);
    let validator = Validator::with_defaults(config.limits.max_source_bytes).unwrap();
    let registry = LanguageRegistry::with_defaults(&config.toolchain);
    let sandbox = Arc::new(ProcessSandbox::new(config.sandbox.clone()));
    Judge::new(config, registry, validator, sandbox)
}

/// Full namespace isolation and no denylist, so only the sandbox stands
/// between a submission and the host
fn isolated_judge(scratch_root: &Path) -> Judge {
    let mut config = config(scratch_root);
    config.sandbox.isolate_network = true;
    config.sandbox.isolate_filesystem = true;
    let validator = Validator::from_config(config.limits.max_source_bytes, &[]).unwrap();
    let registry = LanguageRegistry::with_defaults(&config.toolchain);
    let sandbox = Arc::new(ProcessSandbox::new(config.sandbox.clone()));
    Judge::new(config, registry, validator, sandbox)
}

fn two_sum_request(language: &str, source: &str) -> SubmissionRequest {
    SubmissionRequest {
        source_code: source.to_string(),
        language: language.to_string(),
        test_cases: vec![
            TestCase::new("[2,7,11,15], 9", "[0,1]"),
            TestCase::new("[3,2,4], 6", "[1,2]").hidden(),
        ],
        time_limit_ms: 5000,
        problem: ProblemContract {
            entry_point: EntryPoint {
                name: "twoSum".to_string(),
                params: vec![
                    Param {
                        name: "nums".to_string(),
                        ty: "int[]".parse().unwrap(),
                    },
                    Param {
                        name: "target".to_string(),
                        ty: ValueType::Int,
                    },
                ],
                returns: "int[]".parse().unwrap(),
            },
            order_sensitive: true,
        },
    }
}

fn verdict(response: &JudgeResponse) -> &Verdict {
    match response {
        JudgeResponse::Verdict(v) => v,
        JudgeResponse::Failure(f) => panic!("judging failed: {:?}", f),
    }
}

fn assert_scratch_empty(root: &Path) {
    let leftovers: Vec<_> = std::fs::read_dir(root).unwrap().collect();
    assert!(leftovers.is_empty(), "scratch not cleaned: {:?}", leftovers);
}

const PYTHON_TWO_SUM: &str = "\
def twoSum(nums, target):
    seen = {}
    for i, n in enumerate(nums):
        if target - n in seen:
            return [seen[target - n], i]
        seen[n] = i
    return []
";

#[tokio::test]
async fn python_accepted() {
    require!("python3");
    let root = tempfile::tempdir().unwrap();

    let response = judge(root.path())
        .judge(&two_sum_request("python", PYTHON_TWO_SUM))
        .await;
    let verdict = verdict(&response);
    assert_eq!(verdict.status, SubmissionStatus::Accepted, "{:?}", verdict);
    assert_eq!(verdict.passed_count, 2);
    assert_eq!(verdict.test_results[0].actual_output.as_deref(), Some("[0,1]"));
    assert_scratch_empty(root.path());
}

#[tokio::test]
async fn python_class_solution_with_prints() {
    require!("python3");
    let root = tempfile::tempdir().unwrap();
    let source = "\
class Solution:
    def twoSum(self, nums, target):
        print('debugging', nums)
        for i in range(len(nums)):
            for j in range(i + 1, len(nums)):
                if nums[i] + nums[j] == target:
                    return [i, j]
        return []
";

    let response = judge(root.path())
        .judge(&two_sum_request("python3", source))
        .await;
    assert_eq!(verdict(&response).status, SubmissionStatus::Accepted);
}

#[tokio::test]
async fn python_wrong_answer() {
    require!("python3");
    let root = tempfile::tempdir().unwrap();

    let response = judge(root.path())
        .judge(&two_sum_request("python", "def twoSum(nums, target):\n    return []\n"))
        .await;
    let verdict = verdict(&response);
    assert_eq!(verdict.status, SubmissionStatus::WrongAnswer);
    assert_eq!(verdict.passed_count, 0);
    for result in &verdict.test_results {
        assert_eq!(result.actual_output.as_deref(), Some("[]"));
    }
}

#[tokio::test]
async fn python_time_limit_exceeded() {
    require!("python3");
    let root = tempfile::tempdir().unwrap();
    let source = "\
def twoSum(nums, target):
    x = 0
    while x >= 0:
        x += 1
    return []
";
    let mut request = two_sum_request("python", source);
    request.time_limit_ms = 500;

    let started = Instant::now();
    let response = judge(root.path()).judge(&request).await;
    let verdict = verdict(&response);
    assert_eq!(verdict.status, SubmissionStatus::TimeLimitExceeded);
    for result in &verdict.test_results {
        assert_eq!(result.error_kind, Some(ErrorKind::TimeoutError));
        assert!(result.execution_time_ms < 1000, "{:?}", result);
    }
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_scratch_empty(root.path());
}

#[tokio::test]
async fn python_runtime_error_is_classified() {
    require!("python3");
    let root = tempfile::tempdir().unwrap();
    let source = "def twoSum(nums, target):\n    return [nums[100], 0]\n";

    let response = judge(root.path())
        .judge(&two_sum_request("python", source))
        .await;
    let verdict = verdict(&response);
    assert_eq!(verdict.status, SubmissionStatus::RuntimeError);
    assert_eq!(
        verdict.test_results[0].error_detail.as_deref(),
        Some("IndexError: list index out of range")
    );
}

#[tokio::test]
async fn python_syntax_error_is_compile_error() {
    require!("python3");
    let root = tempfile::tempdir().unwrap();
    let source = "def twoSum(nums, target):\n    return [0, 1\n";

    let response = judge(root.path())
        .judge(&two_sum_request("python", source))
        .await;
    let verdict = verdict(&response);
    assert_eq!(verdict.status, SubmissionStatus::CompileError);
    assert!(verdict.test_results.is_empty());
    assert!(verdict.message.as_deref().unwrap_or_default().contains("Error"));
}

#[tokio::test]
async fn unordered_comparison() {
    require!("python3");
    let root = tempfile::tempdir().unwrap();
    let mut request = two_sum_request("python", "def twoSum(nums, target):\n    return [1, 0]\n");
    request.test_cases.truncate(1);

    request.problem.order_sensitive = false;
    let response = judge(root.path()).judge(&request).await;
    assert_eq!(verdict(&response).status, SubmissionStatus::Accepted);

    request.problem.order_sensitive = true;
    let response = judge(root.path()).judge(&request).await;
    assert_eq!(verdict(&response).status, SubmissionStatus::WrongAnswer);
}

#[tokio::test]
async fn javascript_accepted() {
    require!("node");
    let root = tempfile::tempdir().unwrap();
    let source = "\
function twoSum(nums, target) {
    const seen = new Map();
    for (let i = 0; i < nums.length; i++) {
        if (seen.has(target - nums[i])) return [seen.get(target - nums[i]), i];
        seen.set(nums[i], i);
    }
    return [];
}
";

    let response = judge(root.path())
        .judge(&two_sum_request("javascript", source))
        .await;
    let verdict = verdict(&response);
    assert_eq!(verdict.status, SubmissionStatus::Accepted, "{:?}", verdict);
    assert_scratch_empty(root.path());
}

#[tokio::test]
async fn javascript_runtime_error() {
    require!("node");
    let root = tempfile::tempdir().unwrap();
    let source = "function twoSum(nums, target) {\n    throw new TypeError('bad input');\n}\n";

    let response = judge(root.path())
        .judge(&two_sum_request("js", source))
        .await;
    let verdict = verdict(&response);
    assert_eq!(verdict.status, SubmissionStatus::RuntimeError);
    assert!(
        verdict.test_results[0]
            .error_detail
            .as_deref()
            .unwrap_or_default()
            .contains("TypeError: bad input")
    );
}

#[tokio::test]
async fn cpp_accepted() {
    require!("g++");
    let root = tempfile::tempdir().unwrap();
    let source = "\
class Solution {
public:
    vector<int> twoSum(vector<int>& nums, int target) {
        unordered_map<int, int> seen;
        for (int i = 0; i < (int)nums.size(); i++) {
            auto it = seen.find(target - nums[i]);
            if (it != seen.end()) return {it->second, i};
            seen[nums[i]] = i;
        }
        return {};
    }
};
";

    let response = judge(root.path())
        .judge(&two_sum_request("cpp", source))
        .await;
    let verdict = verdict(&response);
    assert_eq!(verdict.status, SubmissionStatus::Accepted, "{:?}", verdict);
    assert_scratch_empty(root.path());
}

#[tokio::test]
async fn cpp_syntax_error_is_compile_error() {
    require!("g++");
    let root = tempfile::tempdir().unwrap();
    let source = "vector<int> twoSum(vector<int>& nums, int target) {\n    return {0, 1}\n}\n";

    let response = judge(root.path())
        .judge(&two_sum_request("c++", source))
        .await;
    let verdict = verdict(&response);
    assert_eq!(verdict.status, SubmissionStatus::CompileError);
    assert_eq!(verdict.test_results.len(), 0);
    let message = verdict.message.as_deref().unwrap_or_default();
    assert!(message.contains("solution.cpp"), "{}", message);
    assert!(!message.contains(&root.path().display().to_string()));
}

#[tokio::test]
async fn java_accepted() {
    require!("javac", "java");
    let root = tempfile::tempdir().unwrap();
    let source = "\
class Solution {
    public int[] twoSum(int[] nums, int target) {
        Map<Integer, Integer> seen = new HashMap<>();
        for (int i = 0; i < nums.length; i++) {
            Integer j = seen.get(target - nums[i]);
            if (j != null) return new int[] { j, i };
            seen.put(nums[i], i);
        }
        return new int[0];
    }
}
";

    let response = judge(root.path())
        .judge(&two_sum_request("java", source))
        .await;
    let verdict = verdict(&response);
    assert_eq!(verdict.status, SubmissionStatus::Accepted, "{:?}", verdict);
}

#[tokio::test]
async fn cancellation_stops_running_submission() {
    require!("python3");
    let root = tempfile::tempdir().unwrap();
    let source = "\
def twoSum(nums, target):
    x = 0
    while x >= 0:
        x += 1
    return []
";
    let mut request = two_sum_request("python", source);
    request.time_limit_ms = 10_000;

    let started = Instant::now();
    let result = judge(root.path())
        .judge_until(&request, tokio::time::sleep(Duration::from_millis(500)))
        .await;
    assert!(matches!(result, Err(codejudge::JudgeError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_scratch_empty(root.path());
}

#[tokio::test]
async fn submissions_cannot_reach_each_other_or_the_host() {
    require!("python3");
    let root = tempfile::tempdir().unwrap();
    let other = root.path().join("othersubmission");
    std::fs::create_dir(&other).unwrap();
    std::fs::write(other.join("secret.txt"), "[0,1]").unwrap();
    let marker = format!("/tmp/codejudge-leak-{}", uuid::Uuid::new_v4());

    // Returns the right answer only when nothing outside its own directories
    // was readable
    let attacker = format!(
        "\
import os

ROOT = {root:?}
MARKER = {marker:?}

def plant(path):
    try:
        with open(path, 'w') as f:
            f.write('x')
    except OSError:
        pass

def twoSum(nums, target):
    plant(os.path.join(ROOT, 'planted.txt'))
    plant(os.path.join(ROOT, 'othersubmission', 'planted.txt'))
    try:
        for entry in os.listdir(ROOT):
            plant(os.path.join(ROOT, entry, 'planted.txt'))
    except OSError:
        pass
    plant(MARKER)
    try:
        with open(os.path.join(ROOT, 'othersubmission', 'secret.txt')) as f:
            return [9, 9]
    except OSError:
        return [0, 1]
",
        root = root.path().display().to_string(),
        marker = marker,
    );
    let victim = "\
import time

def twoSum(nums, target):
    with open('scratch.txt', 'w') as f:
        f.write('mine')
    time.sleep(0.5)
    return [0, 1]
";
    let mut attack = two_sum_request("python", &attacker);
    attack.test_cases.truncate(1);
    let mut bystander = two_sum_request("python", victim);
    bystander.test_cases.truncate(1);

    let judge = isolated_judge(root.path());
    let (attacked, witnessed) = tokio::join!(judge.judge(&attack), judge.judge(&bystander));
    if attacked.status() == SubmissionStatus::InternalError {
        eprintln!("skipping: namespaces unavailable: {:?}", attacked);
        return;
    }

    assert_eq!(verdict(&attacked).status, SubmissionStatus::Accepted, "{:?}", attacked);
    assert_eq!(verdict(&witnessed).status, SubmissionStatus::Accepted, "{:?}", witnessed);
    assert!(!root.path().join("planted.txt").exists());
    assert!(!other.join("planted.txt").exists());
    assert!(!Path::new(&marker).exists());
    let leftovers: Vec<_> = std::fs::read_dir(root.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(leftovers, vec![std::ffi::OsString::from("othersubmission")]);
}
