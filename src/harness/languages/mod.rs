//! Built-in language adapters

mod cpp;
mod java;
mod javascript;
mod python;

pub use cpp::CppAdapter;
pub use java::JavaAdapter;
pub use javascript::JavaScriptAdapter;
pub use python::PythonAdapter;

use codejudge_common::Param;

/// Declared parameter types as a JSON array of type names
fn param_types_json(params: &[Param]) -> String {
    let names: Vec<String> = params.iter().map(|p| p.ty.to_string()).collect();
    serde_json::Value::from(names).to_string()
}

/// Heap size flag value in MB, never below 16
fn heap_mb(memory_kb: u64) -> u64 {
    (memory_kb / 1024).max(16)
}
