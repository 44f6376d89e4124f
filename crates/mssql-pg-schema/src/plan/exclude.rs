//! Exclusion patterns.

use crate::catalog::QualifiedName;
use crate::error::{MigrateError, Result};
use regex::{Regex, RegexBuilder};

/// Compiled `exclude` patterns.
///
/// `*` matches any run of characters and `?` a single character. A pattern
/// containing a dot is matched against `schema.name`; any other pattern is
/// matched against the bare name as well. Matching ignores case.
#[derive(Debug, Clone, Default)]
pub struct ExcludeMatcher {
    patterns: Vec<(String, Regex)>,
}

impl ExcludeMatcher {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for (i, pattern) in patterns.iter().enumerate() {
            let trimmed = pattern.trim();
            if trimmed.is_empty() {
                return Err(MigrateError::Config(format!(
                    "migration.exclude[{}]: pattern cannot be empty",
                    i
                )));
            }
            let regex = RegexBuilder::new(&glob_to_regex(trimmed))
                .case_insensitive(true)
                .build()
                .map_err(|e| {
                    MigrateError::Config(format!(
                        "migration.exclude[{}]: invalid pattern '{}': {}",
                        i, trimmed, e
                    ))
                })?;
            compiled.push((trimmed.to_string(), regex));
        }
        Ok(Self { patterns: compiled })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// The first pattern matching the name, if any.
    pub fn matching_pattern(&self, name: &QualifiedName) -> Option<&str> {
        let full = name.to_string();
        self.patterns
            .iter()
            .find(|(_, re)| re.is_match(&full) || re.is_match(&name.name))
            .map(|(p, _)| p.as_str())
    }

    pub fn is_excluded(&self, name: &QualifiedName) -> bool {
        self.matching_pattern(name).is_some()
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    out
}
