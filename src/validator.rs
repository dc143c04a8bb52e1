//! Static pre-execution screen of submitted source.
//!
//! The denylist here is a speed bump: it turns away the obvious attempts
//! (spawning processes, opening sockets, evaluating strings as code,
//! `while (true)` loops) before any process is spawned, and gives the
//! submitter a readable reason. It is NOT the security boundary. Pattern
//! matching on source text is trivially bypassed by string concatenation,
//! aliasing or reflection; containment comes from the isolated runner in
//! [`crate::sandbox`], which applies OS-level limits to every process
//! regardless of what this module accepted.

use std::path::Path;

use codejudge_common::ValidationError;
use codejudge_rules::prelude::*;

use crate::config::ConfigError;
use crate::constants::languages;

/// A compiled denylist entry
pub struct DenyRule {
    pub name: String,
    pub description: String,
    spec: BoxedSpec<SourceContext>,
}

impl std::fmt::Debug for DenyRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DenyRule")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

/// Size limit plus an ordered denylist
#[derive(Debug)]
pub struct Validator {
    max_source_bytes: usize,
    rules: Vec<DenyRule>,
}

impl Validator {
    /// Validator with the built-in denylist
    pub fn with_defaults(max_source_bytes: usize) -> Result<Self, ConfigError> {
        Self::from_config(max_source_bytes, &default_denylist())
    }

    /// Validator with a denylist loaded from a JSON file holding an array of
    /// [`NamedRuleConfig`]
    pub fn load(max_source_bytes: usize, path: &Path) -> Result<Self, ConfigError> {
        let denylist_error = |reason: String| ConfigError::Denylist {
            path: path.display().to_string(),
            reason,
        };

        let text = std::fs::read_to_string(path).map_err(|e| denylist_error(e.to_string()))?;
        let configs: Vec<NamedRuleConfig> =
            serde_json::from_str(&text).map_err(|e| denylist_error(e.to_string()))?;

        Self::from_config(max_source_bytes, &configs).map_err(|e| match e {
            ConfigError::Denylist { reason, .. } => denylist_error(reason),
            other => other,
        })
    }

    /// Build every enabled rule through the source-context registry
    pub fn from_config(
        max_source_bytes: usize,
        configs: &[NamedRuleConfig],
    ) -> Result<Self, ConfigError> {
        let registry = source_context_registry();
        let mut rules = Vec::with_capacity(configs.len());

        for config in configs.iter().filter(|c| c.enabled) {
            let errors = registry.validate(&config.rule);
            let spec = match registry.build(&config.rule) {
                Some(spec) if errors.is_empty() => spec,
                _ => {
                    return Err(ConfigError::Denylist {
                        path: "<inline>".to_string(),
                        reason: format!("rule `{}`: {}", config.name, errors.join("; ")),
                    });
                }
            };
            rules.push(DenyRule {
                name: config.name.clone(),
                description: config.description.clone(),
                spec,
            });
        }

        tracing::debug!(rules = rules.len(), "Denylist loaded");

        Ok(Self {
            max_source_bytes,
            rules,
        })
    }

    pub fn rules(&self) -> &[DenyRule] {
        &self.rules
    }

    /// Screen `source` written in `language` (canonical id).
    pub fn validate(&self, source: &str, language: &str) -> Result<(), ValidationError> {
        let size = source.len();
        if size > self.max_source_bytes {
            return Err(ValidationError::TooLarge {
                size,
                limit: self.max_source_bytes,
            });
        }

        let ctx = SourceContext::new(language, source);

        if SourceEmpty.is_satisfied_by(&ctx) {
            return Err(ValidationError::DisallowedConstruct {
                rule: "empty-source".to_string(),
                description: "empty source".to_string(),
            });
        }

        match self.rules.iter().find(|rule| rule.spec.is_satisfied_by(&ctx)) {
            Some(rule) => Err(ValidationError::DisallowedConstruct {
                rule: rule.name.clone(),
                description: rule.description.clone(),
            }),
            None => Ok(()),
        }
    }
}

fn deny(name: &str, description: &str, language: &str, pattern: &str) -> NamedRuleConfig {
    NamedRuleConfig {
        name: name.to_string(),
        description: description.to_string(),
        rule: RuleConfig::language_pattern(language, pattern),
        enabled: true,
    }
}

/// Built-in denylist, in evaluation order
pub fn default_denylist() -> Vec<NamedRuleConfig> {
    vec![
        // JavaScript
        deny(
            "js-restricted-module",
            "loads a filesystem, process or network module",
            languages::JAVASCRIPT,
            r#"(?:\brequire\s*\(\s*|\bfrom\s+|\bimport\s*\(\s*)['"](?:node:)?(?:fs|fs/promises|child_process|net|http|https|http2|dgram|tls|vm|worker_threads|cluster)['"]"#,
        ),
        deny(
            "js-eval",
            "evaluates a string as code",
            languages::JAVASCRIPT,
            r"\beval\s*\(|\bFunction\s*\(",
        ),
        deny(
            "js-infinite-loop",
            "contains an unconditional infinite loop",
            languages::JAVASCRIPT,
            r"\bwhile\s*\(\s*(?:true|1)\s*\)|\bfor\s*\(\s*;\s*;\s*\)",
        ),
        // Python
        deny(
            "python-restricted-module",
            "imports a filesystem, process or network module",
            languages::PYTHON,
            r"(?m)^\s*(?:import\s+(?:[\w.]+\s*,\s*)*(?:os|subprocess|socket|shutil|ctypes|multiprocessing|pty)\b|from\s+(?:os|subprocess|socket|shutil|ctypes|multiprocessing|pty)\b[\w.]*\s+import\b)",
        ),
        deny(
            "python-file-access",
            "opens or manipulates files",
            languages::PYTHON,
            r"\bopen\s*\(|\b(?:pathlib|shutil|fileinput|tempfile)\b",
        ),
        deny(
            "python-dynamic-import",
            "imports a module dynamically",
            languages::PYTHON,
            r"\b__import__\s*\(|\bimportlib\b",
        ),
        deny(
            "python-eval",
            "evaluates a string as code",
            languages::PYTHON,
            r"\b(?:eval|exec)\s*\(",
        ),
        deny(
            "python-infinite-loop",
            "contains an unconditional infinite loop",
            languages::PYTHON,
            r"\bwhile\s+(?:True|1)\s*:",
        ),
        // C++
        deny(
            "cpp-process",
            "spawns or replaces a process",
            languages::CPP,
            r"\b(?:system|popen|fork|vfork|execl|execlp|execle|execv|execvp|execve)\s*\(",
        ),
        deny(
            "cpp-network",
            "includes a network header",
            languages::CPP,
            r"#\s*include\s*<(?:sys/socket\.h|netinet/[\w./]+|arpa/inet\.h|netdb\.h)>",
        ),
        deny(
            "cpp-file-access",
            "opens or manipulates files",
            languages::CPP,
            r"#\s*include\s*<(?:fstream|filesystem|fcntl\.h|sys/stat\.h)>|\b(?:fopen|freopen|fdopen|creat|unlink|rmdir|mkdir|truncate)\s*\(|\b(?:[io]?fstream|filebuf|filesystem)\b",
        ),
        // Java
        deny(
            "java-process",
            "spawns a process",
            languages::JAVA,
            r"\bRuntime\s*\.\s*getRuntime\s*\(|\bProcessBuilder\b",
        ),
        deny(
            "java-network",
            "uses networking APIs",
            languages::JAVA,
            r"\bjava\s*\.\s*net\b",
        ),
        deny(
            "java-file-access",
            "opens or manipulates files",
            languages::JAVA,
            r"\bjava\s*\.\s*nio\s*\.\s*file\b|\bjava\s*\.\s*io\s*\.\s*(?:File|RandomAccessFile)\w*|\b(?:File|FileWriter|FileReader|FileInputStream|FileOutputStream|RandomAccessFile)\s*\(|\b(?:Files|Paths)\s*\.",
        ),
    ]
}
