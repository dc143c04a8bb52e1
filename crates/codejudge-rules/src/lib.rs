//! Specification Pattern implementation for composable source-code rules.
//!
//! Rules are small predicates over a [`SourceContext`](context::SourceContext)
//! built at runtime from a JSON [`RuleConfig`](config::RuleConfig) through a
//! [`SpecRegistry`](registry::SpecRegistry).
//!
//! # Example
//!
//! ```
//! use codejudge_rules::prelude::*;
//!
//! let registry = source_context_registry();
//! let rule = registry
//!     .build(&RuleConfig::language_pattern("python", r"\bimport\s+os\b"))
//!     .unwrap();
//!
//! let ctx = SourceContext::new("python", "import os\n");
//! assert!(rule.is_satisfied_by(&ctx));
//! ```

pub mod config;
pub mod context;
pub mod registry;
pub mod rules;
pub mod specification;

/// Prelude module - import everything you need with `use codejudge_rules::prelude::*`
pub mod prelude {
    pub use crate::config::{NamedRuleConfig, RuleConfig};
    pub use crate::context::SourceContext;
    pub use crate::registry::{source_context_registry, SpecRegistry};
    pub use crate::rules::*;
    pub use crate::specification::{AllOf, AnyOf, BoxedSpec, Not, Specification};
}
