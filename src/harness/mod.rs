//! Language adapters
//!
//! An adapter turns a submission plus the problem's declared entry point into
//! a [`HarnessProgram`]: the files to write into the build directory, an
//! optional compile (or syntax check) command and the run command. The
//! generated harness reads one JSON argument array from stdin, converts it to
//! the declared parameter types, calls the entry point and prints the JSON
//! result as the last line of stdout.
//!
//! The program is built once per submission; each test case only contributes
//! its stdin payload (see [`HarnessProgram::stdin_for`]).
//!
//! Adapters are looked up by language id or alias in a [`LanguageRegistry`],
//! so adding a language never touches the orchestrator.

mod languages;

pub use languages::{CppAdapter, JavaAdapter, JavaScriptAdapter, PythonAdapter};

use std::collections::HashMap;
use std::sync::Arc;

use codejudge_common::{EntryPoint, HarnessBuildError, Param, ProblemContract, TestCase};
use regex::Regex;
use serde_json::Value;

use crate::config::ToolchainConfig;
use crate::sandbox::CommandSpec;

/// How the entry point is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStyle {
    /// Free function at module scope
    Function,
    /// Method on a fresh `Solution` instance
    Method,
}

/// How the memory ceiling is enforced for a language
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryStrategy {
    /// `RLIMIT_AS` on the process
    AddressSpace,
    /// Heap flag on the runtime command line; resident memory is only
    /// watched with headroom
    RuntimeFlag,
}

/// One file written into the build directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub name: String,
    pub contents: String,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contents: contents.into(),
        }
    }
}

/// Generated program for one submission
#[derive(Debug, Clone)]
pub struct HarnessProgram {
    pub language: &'static str,
    pub entry_point: EntryPoint,
    pub style: EntryStyle,
    pub files: Vec<SourceFile>,
    pub compile: Option<CommandSpec>,
    pub run: CommandSpec,
    pub memory: MemoryStrategy,
    pub image: String,
}

impl HarnessProgram {
    /// Stdin payload of one test case: its arguments as a canonical JSON
    /// array, checked against the declared parameters.
    pub fn stdin_for(&self, test_case: &TestCase) -> Result<String, String> {
        encode_arguments(&test_case.input, &self.entry_point.params)
    }
}

/// Parse a test case input (`[2,7,11,15], 9`) and check it against the
/// declared parameters.
pub fn encode_arguments(input: &str, params: &[Param]) -> Result<String, String> {
    let wrapped = format!("[{}]", input);
    let args: Vec<Value> =
        serde_json::from_str(&wrapped).map_err(|e| format!("input is not valid JSON: {}", e))?;

    if args.len() != params.len() {
        return Err(format!(
            "expected {} argument(s), found {}",
            params.len(),
            args.len()
        ));
    }
    for (arg, param) in args.iter().zip(params) {
        if !param.ty.accepts(arg) {
            return Err(format!("argument `{}` is not a valid {}", param.name, param.ty));
        }
    }

    serde_json::to_string(&args).map_err(|e| e.to_string())
}

/// The result line of a harness run: the last non-empty stdout line
pub fn extract_result(stdout: &str) -> Option<&str> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
}

/// Per-language harness generation and toolchain commands
pub trait LanguageAdapter: Send + Sync {
    /// Canonical language id
    fn id(&self) -> &'static str;

    /// Other names accepted in requests
    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    /// Regex source matching a definition of `name` (already escaped)
    fn definition_pattern(&self, name: &str) -> String;

    /// Regex source matching a `Solution` class declaration
    fn solution_class_pattern(&self) -> &'static str;

    /// Find the declared entry point in the source
    fn locate_entry_point(
        &self,
        source: &str,
        entry_point: &EntryPoint,
    ) -> Result<EntryStyle, HarnessBuildError> {
        check_identifier(&entry_point.name)?;

        let not_found = || HarnessBuildError::EntryPointNotFound {
            name: entry_point.name.clone(),
            language: self.id().to_string(),
        };
        let definition = Regex::new(&self.definition_pattern(&regex::escape(&entry_point.name)))
            .map_err(|_| not_found())?;
        if !definition.is_match(source) {
            return Err(not_found());
        }

        let has_class = Regex::new(self.solution_class_pattern())
            .map(|re| re.is_match(source))
            .unwrap_or(false);
        Ok(if has_class {
            EntryStyle::Method
        } else {
            EntryStyle::Function
        })
    }

    /// Files making up the harness program
    fn source_files(&self, source: &str, contract: &ProblemContract, style: EntryStyle) -> Vec<SourceFile>;

    /// Compile or syntax-check step, run once in the build directory
    fn compile_command(&self) -> Option<CommandSpec>;

    /// Command running one test case
    fn run_command(&self, memory_kb: u64) -> CommandSpec;

    /// Image used by the container backend
    fn container_image(&self) -> &str;

    fn memory_strategy(&self) -> MemoryStrategy;

    /// Generate the harness program for a submission
    fn build_harness(
        &self,
        source: &str,
        contract: &ProblemContract,
        memory_kb: u64,
    ) -> Result<HarnessProgram, HarnessBuildError> {
        let style = self.locate_entry_point(source, &contract.entry_point)?;
        Ok(HarnessProgram {
            language: self.id(),
            entry_point: contract.entry_point.clone(),
            style,
            files: self.source_files(source, contract, style),
            compile: self.compile_command(),
            run: self.run_command(memory_kb),
            memory: self.memory_strategy(),
            image: self.container_image().to_string(),
        })
    }
}

/// Entry point names are spliced into generated code
fn check_identifier(name: &str) -> Result<(), HarnessBuildError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$');
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$') {
        Ok(())
    } else {
        Err(HarnessBuildError::InvalidEntryPointName(name.to_string()))
    }
}

/// Adapters keyed by language id and alias
#[derive(Default, Clone)]
pub struct LanguageRegistry {
    adapters: HashMap<String, Arc<dyn LanguageAdapter>>,
}

impl LanguageRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in languages
    pub fn with_defaults(toolchain: &ToolchainConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PythonAdapter::new(toolchain)));
        registry.register(Arc::new(JavaScriptAdapter::new(toolchain)));
        registry.register(Arc::new(CppAdapter::new(toolchain)));
        registry.register(Arc::new(JavaAdapter::new(toolchain)));
        registry
    }

    /// Register an adapter under its id and aliases, replacing earlier ones
    pub fn register(&mut self, adapter: Arc<dyn LanguageAdapter>) {
        for alias in adapter.aliases() {
            self.adapters.insert(alias.to_string(), adapter.clone());
        }
        self.adapters.insert(adapter.id().to_string(), adapter);
    }

    /// Look up by id or alias, case-insensitively
    pub fn resolve(&self, language: &str) -> Option<Arc<dyn LanguageAdapter>> {
        self.adapters
            .get(&language.trim().to_ascii_lowercase())
            .cloned()
    }

    /// Canonical ids of registered languages
    pub fn languages(&self) -> Vec<&'static str> {
        let mut ids: Vec<&'static str> = self.adapters.values().map(|a| a.id()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

impl std::fmt::Debug for LanguageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanguageRegistry")
            .field("languages", &self.languages())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codejudge_common::ValueType;

    fn params() -> Vec<Param> {
        vec![
            Param {
                name: "nums".into(),
                ty: "int[]".parse().unwrap(),
            },
            Param {
                name: "target".into(),
                ty: ValueType::Int,
            },
        ]
    }

    #[test]
    fn test_encode_arguments() {
        assert_eq!(
            encode_arguments("[2,7,11,15], 9", &params()).unwrap(),
            "[[2,7,11,15],9]"
        );
        assert_eq!(
            encode_arguments(" [3, 2, 4] ,6 ", &params()).unwrap(),
            "[[3,2,4],6]"
        );
    }

    #[test]
    fn test_encode_arguments_rejects_bad_input() {
        let err = encode_arguments("[1,2]", &params()).unwrap_err();
        assert!(err.contains("expected 2"));

        let err = encode_arguments("[1,2], \"9\"", &params()).unwrap_err();
        assert!(err.contains("target"));

        let err = encode_arguments("[1,2], 3000000000", &params()).unwrap_err();
        assert!(err.contains("target"));

        assert!(encode_arguments("[1,2, 9", &params()).is_err());
    }

    #[test]
    fn test_extract_result() {
        assert_eq!(extract_result("debug\n\n[0,1]\n"), Some("[0,1]"));
        assert_eq!(extract_result("  \n"), None);
        assert_eq!(extract_result(""), None);
    }

    #[test]
    fn test_identifier_check() {
        assert!(check_identifier("twoSum").is_ok());
        assert!(check_identifier("_helper$1").is_ok());
        assert!(check_identifier("1abc").is_err());
        assert!(check_identifier("a(b)").is_err());
        assert!(check_identifier("").is_err());
    }

    #[test]
    fn test_registry_resolves_aliases() {
        let registry = LanguageRegistry::with_defaults(&ToolchainConfig::default());
        assert_eq!(registry.resolve("Python3").unwrap().id(), "python");
        assert_eq!(registry.resolve("js").unwrap().id(), "javascript");
        assert_eq!(registry.resolve("C++").unwrap().id(), "cpp");
        assert_eq!(registry.resolve("java").unwrap().id(), "java");
        assert!(registry.resolve("cobol").is_none());
        assert_eq!(registry.languages(), vec!["cpp", "java", "javascript", "python"]);
        for id in crate::constants::languages::ALL {
            assert_eq!(registry.resolve(id).unwrap().id(), *id);
        }
    }
}
