//! JSON configuration for dynamic rule building.
//!
//! Operators can ship a denylist as JSON instead of recompiling the judge.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// JSON representation of a rule configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleConfig {
    /// A single specification by name
    Spec {
        name: String,
        #[serde(default)]
        params: HashMap<String, serde_json::Value>,
    },
    /// AND combination of rules
    And { rules: Vec<RuleConfig> },
    /// OR combination of rules
    Or { rules: Vec<RuleConfig> },
    /// Negation of a rule
    Not { rule: Box<RuleConfig> },
}

impl RuleConfig {
    pub fn spec(name: impl Into<String>) -> Self {
        RuleConfig::Spec {
            name: name.into(),
            params: HashMap::new(),
        }
    }

    pub fn spec_with_params(
        name: impl Into<String>,
        params: HashMap<String, serde_json::Value>,
    ) -> Self {
        RuleConfig::Spec {
            name: name.into(),
            params,
        }
    }

    /// `LanguageIs(language) AND ContainsPattern(pattern)`
    pub fn language_pattern(language: &str, pattern: &str) -> Self {
        RuleConfig::and(vec![
            RuleConfig::spec_with_params(
                "LanguageIs",
                [("language".to_string(), serde_json::json!(language))]
                    .into_iter()
                    .collect(),
            ),
            RuleConfig::spec_with_params(
                "ContainsPattern",
                [("pattern".to_string(), serde_json::json!(pattern))]
                    .into_iter()
                    .collect(),
            ),
        ])
    }

    pub fn and(rules: Vec<RuleConfig>) -> Self {
        RuleConfig::And { rules }
    }

    pub fn or(rules: Vec<RuleConfig>) -> Self {
        RuleConfig::Or { rules }
    }

    pub fn not(rule: RuleConfig) -> Self {
        RuleConfig::Not {
            rule: Box::new(rule),
        }
    }
}

/// One named denylist entry as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedRuleConfig {
    pub name: String,
    /// Shown to the submitter when the rule matches
    pub description: String,
    pub rule: RuleConfig,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}
