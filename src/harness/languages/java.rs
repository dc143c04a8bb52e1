//! Java adapter
//!
//! The submission must declare `class Solution`; it is compiled next to a
//! generated `Main` that converts each argument reflectively to the declared
//! Java type and calls the method on a new instance.

use codejudge_common::{EntryPoint, HarnessBuildError, ProblemContract, ValueType};
use regex::Regex;

use super::heap_mb;
use crate::config::ToolchainConfig;
use crate::constants::languages;
use crate::harness::{EntryStyle, LanguageAdapter, MemoryStrategy, SourceFile};
use crate::sandbox::{CommandArg, CommandSpec};

const MAIN_TEMPLATE: &str = include_str!("../templates/Main.java");

#[derive(Debug, Clone)]
pub struct JavaAdapter {
    javac: String,
    java: String,
    image: String,
}

impl JavaAdapter {
    pub fn new(toolchain: &ToolchainConfig) -> Self {
        Self {
            javac: toolchain.javac.clone(),
            java: toolchain.java.clone(),
            image: toolchain.java_image.clone(),
        }
    }
}

/// Java spelling of a declared type
fn java_type(ty: &ValueType) -> String {
    match ty {
        ValueType::Int => "int".to_string(),
        ValueType::Long => "long".to_string(),
        ValueType::Double => "double".to_string(),
        ValueType::Bool => "boolean".to_string(),
        ValueType::String => "String".to_string(),
        ValueType::List(inner) => format!("{}[]", java_type(inner)),
    }
}

/// Cast target for a converted argument: boxed for scalars, the array type
/// otherwise
fn cast_type(ty: &ValueType) -> String {
    match ty {
        ValueType::Int => "Integer".to_string(),
        ValueType::Long => "Long".to_string(),
        ValueType::Double => "Double".to_string(),
        ValueType::Bool => "Boolean".to_string(),
        other => java_type(other),
    }
}

fn call_expression(entry_point: &EntryPoint) -> String {
    let args: Vec<String> = entry_point
        .params
        .iter()
        .enumerate()
        .map(|(i, param)| {
            format!(
                "({}) JudgeJson.convert(args.get({}), {}.class)",
                cast_type(&param.ty),
                i,
                java_type(&param.ty)
            )
        })
        .collect();
    format!("solution.{}({})", entry_point.name, args.join(", "))
}

impl LanguageAdapter for JavaAdapter {
    fn id(&self) -> &'static str {
        languages::JAVA
    }

    fn definition_pattern(&self, name: &str) -> String {
        format!(
            r"\b{}\s*\([^;{{}}]*\)\s*(?:throws\s+[\w.,\s]+)?\{{",
            name
        )
    }

    fn solution_class_pattern(&self) -> &'static str {
        r"\bclass\s+Solution\b"
    }

    /// Only the method style exists in Java
    fn locate_entry_point(
        &self,
        source: &str,
        entry_point: &EntryPoint,
    ) -> Result<EntryStyle, HarnessBuildError> {
        let has_class = Regex::new(self.solution_class_pattern())
            .map(|re| re.is_match(source))
            .unwrap_or(false);
        if !has_class {
            return Err(HarnessBuildError::EntryPointNotFound {
                name: format!("Solution.{}", entry_point.name),
                language: self.id().to_string(),
            });
        }

        crate::harness::check_identifier(&entry_point.name)?;
        let definition = Regex::new(&self.definition_pattern(&regex::escape(&entry_point.name)));
        match definition {
            Ok(re) if re.is_match(source) => Ok(EntryStyle::Method),
            _ => Err(HarnessBuildError::EntryPointNotFound {
                name: entry_point.name.clone(),
                language: self.id().to_string(),
            }),
        }
    }

    fn source_files(&self, source: &str, contract: &ProblemContract, _style: EntryStyle) -> Vec<SourceFile> {
        // Same line, so compiler diagnostics keep the user's line numbers
        let solution = format!("import java.util.*; {}", source);
        let main = MAIN_TEMPLATE.replace("__CALL__", &call_expression(&contract.entry_point));

        vec![
            SourceFile::new("Solution.java", solution),
            SourceFile::new("Main.java", main),
        ]
    }

    fn compile_command(&self) -> Option<CommandSpec> {
        Some(
            CommandSpec::new(CommandArg::lit(&self.javac))
                .lit("-encoding")
                .lit("UTF-8")
                .lit("-nowarn")
                .lit("-d")
                .arg(CommandArg::build(""))
                .arg(CommandArg::build("Solution.java"))
                .arg(CommandArg::build("Main.java")),
        )
    }

    fn run_command(&self, memory_kb: u64) -> CommandSpec {
        CommandSpec::new(CommandArg::lit(&self.java))
            .lit(format!("-Xmx{}m", heap_mb(memory_kb)))
            .lit("-Xss64m")
            .lit("-XX:+UseSerialGC")
            .lit("-XX:TieredStopAtLevel=1")
            .lit("-cp")
            .arg(CommandArg::build(""))
            .lit("Main")
    }

    fn container_image(&self) -> &str {
        &self.image
    }

    fn memory_strategy(&self) -> MemoryStrategy {
        MemoryStrategy::RuntimeFlag
    }
}
