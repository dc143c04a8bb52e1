//! Python adapter

use codejudge_common::ProblemContract;

use super::param_types_json;
use crate::config::ToolchainConfig;
use crate::constants::languages;
use crate::harness::{EntryStyle, LanguageAdapter, MemoryStrategy, SourceFile};
use crate::sandbox::{CommandArg, CommandSpec};

const MAIN_TEMPLATE: &str = include_str!("../templates/main.py");

/// User code lives in `solution.py`; `main.py` imports it as a module so
/// tracebacks keep the submission's own line numbers.
#[derive(Debug, Clone)]
pub struct PythonAdapter {
    python: String,
    image: String,
}

impl PythonAdapter {
    pub fn new(toolchain: &ToolchainConfig) -> Self {
        Self {
            python: toolchain.python.clone(),
            image: toolchain.python_image.clone(),
        }
    }
}

impl LanguageAdapter for PythonAdapter {
    fn id(&self) -> &'static str {
        languages::PYTHON
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["python3", "py"]
    }

    fn definition_pattern(&self, name: &str) -> String {
        format!(r"(?m)^[ \t]*(?:async[ \t]+)?def[ \t]+{}[ \t]*\(", name)
    }

    fn solution_class_pattern(&self) -> &'static str {
        r"(?m)^class[ \t]+Solution\b"
    }

    fn source_files(&self, source: &str, contract: &ProblemContract, style: EntryStyle) -> Vec<SourceFile> {
        let name = &contract.entry_point.name;
        let entry = match style {
            EntryStyle::Method => format!("getattr(_user.Solution(), \"{}\")", name),
            EntryStyle::Function => format!("getattr(_user, \"{}\")", name),
        };
        let main = MAIN_TEMPLATE
            .replace("__PARAM_TYPES__", &param_types_json(&contract.entry_point.params))
            .replace("__ENTRY__", &entry);

        vec![
            SourceFile::new("solution.py", source),
            SourceFile::new("main.py", main),
        ]
    }

    fn compile_command(&self) -> Option<CommandSpec> {
        Some(
            CommandSpec::new(CommandArg::lit(&self.python))
                .lit("-E")
                .lit("-s")
                .lit("-m")
                .lit("py_compile")
                .arg(CommandArg::build("solution.py")),
        )
    }

    fn run_command(&self, _memory_kb: u64) -> CommandSpec {
        CommandSpec::new(CommandArg::lit(&self.python))
            .lit("-E")
            .lit("-s")
            .lit("-B")
            .arg(CommandArg::build("main.py"))
    }

    fn container_image(&self) -> &str {
        &self.image
    }

    fn memory_strategy(&self) -> MemoryStrategy {
        MemoryStrategy::AddressSpace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codejudge_common::{EntryPoint, HarnessBuildError, Param, ValueType};

    fn contract(name: &str) -> ProblemContract {
        ProblemContract {
            entry_point: EntryPoint {
                name: name.into(),
                params: vec![
                    Param {
                        name: "nums".into(),
                        ty: "int[]".parse().unwrap(),
                    },
                    Param {
                        name: "target".into(),
                        ty: ValueType::Int,
                    },
                ],
                returns: "int[]".parse().unwrap(),
            },
            order_sensitive: true,
        }
    }

    fn adapter() -> PythonAdapter {
        PythonAdapter::new(&ToolchainConfig::default())
    }

    #[test]
    fn test_locates_free_function() {
        let source = "def twoSum(nums, target):\n    return []\n";
        let style = adapter()
            .locate_entry_point(source, &contract("twoSum").entry_point)
            .unwrap();
        assert_eq!(style, EntryStyle::Function);
    }

    #[test]
    fn test_locates_solution_method() {
        let source = "class Solution:\n    def twoSum(self, nums, target):\n        return []\n";
        let style = adapter()
            .locate_entry_point(source, &contract("twoSum").entry_point)
            .unwrap();
        assert_eq!(style, EntryStyle::Method);
    }

    #[test]
    fn test_missing_entry_point() {
        let source = "def two_sum(nums, target):\n    return []\n";
        let err = adapter()
            .build_harness(source, &contract("twoSum"), 262_144)
            .unwrap_err();
        assert!(matches!(err, HarnessBuildError::EntryPointNotFound { .. }));
    }

    #[test]
    fn test_harness_files() {
        let source = "def twoSum(nums, target):\n    return [0, 1]\n";
        let program = adapter()
            .build_harness(source, &contract("twoSum"), 262_144)
            .unwrap();

        assert_eq!(program.files[0].name, "solution.py");
        assert_eq!(program.files[0].contents, source);
        let main = &program.files[1].contents;
        assert!(main.contains(r#"_PARAM_TYPES = ["int[]","int"]"#));
        assert!(main.contains("getattr(_user, \"twoSum\")"));
        assert!(!main.contains("__ENTRY__"));
        assert!(program.compile.is_some());
        assert_eq!(program.memory, MemoryStrategy::AddressSpace);
    }
}
