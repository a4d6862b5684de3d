//! File name pattern compilation and matching.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use regex::Regex;

use super::error::{StoreError, StoreResult};

/// A compiled, immutable file name pattern.
///
/// Patterns are regular expressions searched against the base file name.
/// They are unanchored unless the pattern anchors itself (`^invoice_`),
/// and matching is case-sensitive.
#[derive(Clone)]
pub struct Pattern {
    source: Arc<str>,
    regex: Arc<Regex>,
}

impl Pattern {
    /// Compile a pattern. Empty and ill-formed patterns are rejected.
    pub fn compile(pattern: &str) -> StoreResult<Self> {
        if pattern.is_empty() {
            return Err(StoreError::InvalidPattern {
                pattern: String::new(),
                reason: "pattern is empty".to_string(),
            });
        }

        let regex = Regex::new(pattern).map_err(|e| StoreError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            source: Arc::from(pattern),
            regex: Arc::new(regex),
        })
    }

    /// Test a base file name.
    pub fn test(&self, file_name: &str) -> bool {
        self.regex.is_match(file_name)
    }

    /// Test the base name of `path`. Paths without a UTF-8 file name never match.
    pub fn test_path(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| self.test(name))
    }

    /// The pattern text as it was compiled.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern").field(&self.as_str()).finish()
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Pattern {}
