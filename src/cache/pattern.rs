//! Glob patterns over cache keys
//!
//! `*` matches any run of characters including `:` separators, `?` matches
//! one character, `[...]` matches a character class. A pattern without
//! wildcards matches exactly one key.

use super::{CacheError, CacheResult};
use glob::{MatchOptions, Pattern};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
pub struct KeyPattern {
    raw: String,
    pattern: Pattern,
}

impl KeyPattern {
    pub fn new(raw: &str) -> CacheResult<Self> {
        let pattern = Pattern::new(raw).map_err(|e| CacheError::InvalidPattern {
            pattern: raw.to_string(),
            message: e.msg.to_string(),
        })?;

        Ok(Self {
            raw: raw.to_string(),
            pattern,
        })
    }

    pub fn matches(&self, key: &str) -> bool {
        self.pattern.matches_with(key, MATCH_OPTIONS)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl std::fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}
