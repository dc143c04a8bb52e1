//! Context types for specification evaluation.

use serde::{Deserialize, Serialize};

/// A submitted source file and the language it claims to be.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceContext {
    /// Canonical language id (`python`, `javascript`, `cpp`, `java`)
    pub language: String,
    pub source: String,
}

impl SourceContext {
    pub fn new(language: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            source: source.into(),
        }
    }

    /// Source size in bytes
    pub fn size_bytes(&self) -> usize {
        self.source.len()
    }
}
