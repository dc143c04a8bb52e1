//! JavaScript (Node.js) adapter

use codejudge_common::ProblemContract;

use super::heap_mb;
use crate::config::ToolchainConfig;
use crate::constants::languages;
use crate::harness::{EntryStyle, LanguageAdapter, MemoryStrategy, SourceFile};
use crate::sandbox::{CommandArg, CommandSpec};

const TRAILER_TEMPLATE: &str = include_str!("../templates/trailer.js");

/// The harness is appended to the user code in one `main.js`, so top-level
/// declarations are in scope and user line numbers are unchanged.
#[derive(Debug, Clone)]
pub struct JavaScriptAdapter {
    node: String,
    image: String,
}

impl JavaScriptAdapter {
    pub fn new(toolchain: &ToolchainConfig) -> Self {
        Self {
            node: toolchain.node.clone(),
            image: toolchain.javascript_image.clone(),
        }
    }
}

impl LanguageAdapter for JavaScriptAdapter {
    fn id(&self) -> &'static str {
        languages::JAVASCRIPT
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["js", "node", "nodejs"]
    }

    fn definition_pattern(&self, name: &str) -> String {
        [
            // function twoSum(...)
            format!(r"\bfunction\s*\*?\s*{}\s*\(", name),
            // const twoSum = (...) => / function
            format!(r"\b(?:const|let|var)\s+{}\s*=", name),
            // class method
            format!(r"(?m)^\s*(?:static\s+)?(?:async\s+)?{}\s*\([^)]*\)\s*\{{", name),
        ]
        .join("|")
    }

    fn solution_class_pattern(&self) -> &'static str {
        r"\bclass\s+Solution\b"
    }

    fn source_files(&self, source: &str, contract: &ProblemContract, style: EntryStyle) -> Vec<SourceFile> {
        let name = &contract.entry_point.name;
        let entry = match style {
            EntryStyle::Method => format!(
                "(function (s) {{ return s.{0}.bind(s); }})(new Solution())",
                name
            ),
            EntryStyle::Function => name.clone(),
        };
        let mut main = String::with_capacity(source.len() + TRAILER_TEMPLATE.len());
        main.push_str(source);
        main.push_str(&TRAILER_TEMPLATE.replace("__ENTRY__", &entry));

        vec![SourceFile::new("main.js", main)]
    }

    fn compile_command(&self) -> Option<CommandSpec> {
        Some(
            CommandSpec::new(CommandArg::lit(&self.node))
                .lit("--check")
                .arg(CommandArg::build("main.js")),
        )
    }

    fn run_command(&self, memory_kb: u64) -> CommandSpec {
        CommandSpec::new(CommandArg::lit(&self.node))
            .lit(format!("--max-old-space-size={}", heap_mb(memory_kb)))
            .arg(CommandArg::build("main.js"))
    }

    fn container_image(&self) -> &str {
        &self.image
    }

    fn memory_strategy(&self) -> MemoryStrategy {
        MemoryStrategy::RuntimeFlag
    }
}
