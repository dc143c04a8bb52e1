//! SpecRegistry for dynamic rule building from JSON configuration.

use crate::config::RuleConfig;
use crate::context::SourceContext;
use crate::rules::{ContainsPattern, LanguageIs, SourceEmpty, SourceLargerThan};
use crate::specification::{AllOf, AnyOf, BoxedSpec, Not};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Factory function type for creating specifications from parameters.
pub type SpecFactory<Ctx> =
    Arc<dyn Fn(&HashMap<String, Value>) -> Option<BoxedSpec<Ctx>> + Send + Sync>;

/// Maps specification names to factories taking JSON parameters.
pub struct SpecRegistry<Ctx: 'static> {
    factories: HashMap<String, SpecFactory<Ctx>>,
}

impl<Ctx: 'static> Default for SpecRegistry<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx: 'static> SpecRegistry<Ctx> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a specification factory.
    ///
    /// The factory receives a HashMap of parameters and returns an optional
    /// Arc-wrapped specification. Return `None` if parameters are invalid.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&HashMap<String, Value>) -> Option<BoxedSpec<Ctx>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Check if a specification is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// List all registered specification names.
    pub fn list(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    /// Create a specification by name with parameters.
    pub fn create(&self, name: &str, params: &HashMap<String, Value>) -> Option<BoxedSpec<Ctx>> {
        self.factories.get(name).and_then(|factory| factory(params))
    }

    /// Build a specification tree from a RuleConfig.
    ///
    /// Returns `None` if any referenced spec is not registered or
    /// if parameters are invalid.
    pub fn build(&self, config: &RuleConfig) -> Option<BoxedSpec<Ctx>> {
        match config {
            RuleConfig::Spec { name, params } => self.create(name, params),
            RuleConfig::And { rules } => {
                let specs = self.build_all(rules)?;
                Some(Arc::new(AllOf::new(specs)))
            }
            RuleConfig::Or { rules } => {
                let specs = self.build_all(rules)?;
                Some(Arc::new(AnyOf::new(specs)))
            }
            RuleConfig::Not { rule } => {
                let inner = self.build(rule)?;
                Some(Arc::new(Not(inner)))
            }
        }
    }

    fn build_all(&self, rules: &[RuleConfig]) -> Option<Vec<BoxedSpec<Ctx>>> {
        if rules.is_empty() {
            return None;
        }
        rules.iter().map(|r| self.build(r)).collect()
    }

    /// Validate a RuleConfig without building it.
    ///
    /// Returns a list of errors if the config references unknown specs
    /// or has invalid structure.
    pub fn validate(&self, config: &RuleConfig) -> Vec<String> {
        let mut errors = Vec::new();
        self.validate_recursive(config, &mut errors);
        errors
    }

    fn validate_recursive(&self, config: &RuleConfig, errors: &mut Vec<String>) {
        match config {
            RuleConfig::Spec { name, params } => {
                if !self.contains(name) {
                    errors.push(format!("Unknown specification: {}", name));
                } else if self.create(name, params).is_none() {
                    errors.push(format!(
                        "Invalid parameters for specification '{}': {:?}",
                        name, params
                    ));
                }
            }
            RuleConfig::And { rules } | RuleConfig::Or { rules } => {
                if rules.is_empty() {
                    errors.push("Empty AND/OR rule list".to_string());
                }
                for rule in rules {
                    self.validate_recursive(rule, errors);
                }
            }
            RuleConfig::Not { rule } => {
                self.validate_recursive(rule, errors);
            }
        }
    }
}

/// Registry with every built-in [`SourceContext`] rule.
///
/// | name | params |
/// |---|---|
/// | `ContainsPattern` | `pattern`: regex |
/// | `LanguageIs` | `language`: language id |
/// | `SourceLargerThan` | `bytes`: integer |
/// | `SourceEmpty` | none |
pub fn source_context_registry() -> SpecRegistry<SourceContext> {
    let mut registry = SpecRegistry::new();

    registry.register("ContainsPattern", |params| {
        let pattern = params.get("pattern")?.as_str()?;
        let rule = ContainsPattern::new(pattern).ok()?;
        Some(Arc::new(rule))
    });

    registry.register("LanguageIs", |params| {
        let language = params.get("language")?.as_str()?;
        Some(Arc::new(LanguageIs::new(language)))
    });

    registry.register("SourceLargerThan", |params| {
        let bytes = params.get("bytes")?.as_u64()?;
        Some(Arc::new(SourceLargerThan::new(usize::try_from(bytes).ok()?)))
    });

    registry.register("SourceEmpty", |_| Some(Arc::new(SourceEmpty)));

    registry
}
