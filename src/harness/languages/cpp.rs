//! C++ adapter
//!
//! `main.cpp` is the JSON prelude, then the submission under a `#line`
//! directive (so diagnostics point at `solution.cpp`), then a generated
//! `main` converting the arguments to the declared C++ types.

use codejudge_common::{ProblemContract, ValueType};

use crate::config::ToolchainConfig;
use crate::constants::languages;
use crate::harness::{EntryStyle, LanguageAdapter, MemoryStrategy, SourceFile};
use crate::sandbox::{CommandArg, CommandSpec};

const PRELUDE: &str = include_str!("../templates/prelude.hpp");

#[derive(Debug, Clone)]
pub struct CppAdapter {
    cxx: String,
    image: String,
}

impl CppAdapter {
    pub fn new(toolchain: &ToolchainConfig) -> Self {
        Self {
            cxx: toolchain.cxx.clone(),
            image: toolchain.cpp_image.clone(),
        }
    }
}

/// C++ spelling of a declared type
fn cpp_type(ty: &ValueType) -> String {
    match ty {
        ValueType::Int => "int".to_string(),
        ValueType::Long => "long long".to_string(),
        ValueType::Double => "double".to_string(),
        ValueType::Bool => "bool".to_string(),
        ValueType::String => "std::string".to_string(),
        ValueType::List(inner) => format!("std::vector<{}>", cpp_type(inner)),
    }
}

fn generated_main(contract: &ProblemContract, style: EntryStyle) -> String {
    let entry = &contract.entry_point;
    let mut body = String::new();

    for (i, param) in entry.params.iter().enumerate() {
        body.push_str(&format!(
            "    {ty} judge_arg{i} = judge_harness::Convert<{ty}>::from(judge_args.items.at({i}));\n",
            ty = cpp_type(&param.ty),
            i = i
        ));
    }

    let args: Vec<String> = (0..entry.params.len())
        .map(|i| format!("judge_arg{}", i))
        .collect();
    let call = match style {
        EntryStyle::Method => {
            body.push_str("    Solution judge_solution;\n");
            format!("judge_solution.{}({})", entry.name, args.join(", "))
        }
        EntryStyle::Function => format!("{}({})", entry.name, args.join(", ")),
    };

    format!(
        "int main() {{\n\
         \x20   std::string judge_input((std::istreambuf_iterator<char>(std::cin)), std::istreambuf_iterator<char>());\n\
         \x20   judge_harness::Value judge_args = judge_harness::Parser(judge_input).parse();\n\
         {body}\
         \x20   auto judge_result = {call};\n\
         \x20   std::cout << '\\n';\n\
         \x20   judge_harness::write(std::cout, judge_result);\n\
         \x20   std::cout << '\\n' << std::flush;\n\
         \x20   return 0;\n\
         }}\n",
        body = body,
        call = call
    )
}

impl LanguageAdapter for CppAdapter {
    fn id(&self) -> &'static str {
        languages::CPP
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["c++", "cxx"]
    }

    fn definition_pattern(&self, name: &str) -> String {
        // `twoSum(vector<int>& nums, int target) {` including const/noexcept
        format!(
            r"\b{}\s*\([^;{{}}]*\)\s*(?:const\s*)?(?:noexcept\s*)?(?:override\s*)?\{{",
            name
        )
    }

    fn solution_class_pattern(&self) -> &'static str {
        r"\b(?:class|struct)\s+Solution\b"
    }

    fn source_files(&self, source: &str, contract: &ProblemContract, style: EntryStyle) -> Vec<SourceFile> {
        let mut main = String::with_capacity(PRELUDE.len() + source.len() + 1024);
        main.push_str(PRELUDE);
        main.push_str("#line 1 \"solution.cpp\"\n");
        main.push_str(source);
        main.push_str("\n#line 1 \"harness.cpp\"\n");
        main.push_str(&generated_main(contract, style));

        vec![SourceFile::new("main.cpp", main)]
    }

    fn compile_command(&self) -> Option<CommandSpec> {
        Some(
            CommandSpec::new(CommandArg::lit(&self.cxx))
                .lit("-O2")
                .lit("-std=c++17")
                .lit("-o")
                .arg(CommandArg::build("solution"))
                .arg(CommandArg::build("main.cpp")),
        )
    }

    fn run_command(&self, _memory_kb: u64) -> CommandSpec {
        CommandSpec::new(CommandArg::build("solution"))
    }

    fn container_image(&self) -> &str {
        &self.image
    }

    fn memory_strategy(&self) -> MemoryStrategy {
        MemoryStrategy::AddressSpace
    }
}
