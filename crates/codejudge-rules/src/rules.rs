//! Leaf rules over submitted source code.

use crate::context::SourceContext;
use crate::specification::Specification;
use regex::Regex;

/// Source matches a regular expression.
#[derive(Debug, Clone)]
pub struct ContainsPattern {
    pattern: Regex,
}

impl ContainsPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }
}

impl Specification<SourceContext> for ContainsPattern {
    fn is_satisfied_by(&self, ctx: &SourceContext) -> bool {
        self.pattern.is_match(&ctx.source)
    }
}

/// Submission language equals the given id.
#[derive(Debug, Clone)]
pub struct LanguageIs {
    pub language: String,
}

impl LanguageIs {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }
}

impl Specification<SourceContext> for LanguageIs {
    fn is_satisfied_by(&self, ctx: &SourceContext) -> bool {
        ctx.language.eq_ignore_ascii_case(&self.language)
    }
}

/// Source is larger than N bytes.
#[derive(Debug, Clone, Copy)]
pub struct SourceLargerThan {
    pub bytes: usize,
}

impl SourceLargerThan {
    pub fn new(bytes: usize) -> Self {
        Self { bytes }
    }
}

impl Specification<SourceContext> for SourceLargerThan {
    fn is_satisfied_by(&self, ctx: &SourceContext) -> bool {
        ctx.size_bytes() > self.bytes
    }
}

/// Source is empty or whitespace only.
#[derive(Debug, Clone, Copy)]
pub struct SourceEmpty;

impl Specification<SourceContext> for SourceEmpty {
    fn is_satisfied_by(&self, ctx: &SourceContext) -> bool {
        ctx.source.trim().is_empty()
    }
}
