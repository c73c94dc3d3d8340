// Keyward — Name pattern lists
//
// Ordered glob rules over credential names. Used by the classifier, sync
// targets, tier assignments and provider credential mappings. Matching is
// case-insensitive: env names are conventionally upper case, but a config
// author writing `*_token` should not silently match nothing.

use glob::{MatchOptions, Pattern};

use crate::config::ConfigError;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// An ordered list of compiled glob patterns.
#[derive(Debug, Clone, Default)]
pub struct PatternList {
    patterns: Vec<Pattern>,
}

impl PatternList {
    /// Compile every pattern, failing on the first invalid one.
    pub fn compile<S: AsRef<str>>(raw: &[S]) -> Result<Self, ConfigError> {
        let mut patterns = Vec::with_capacity(raw.len());
        for p in raw {
            let p = p.as_ref().trim();
            if p.is_empty() {
                return Err(ConfigError::Pattern {
                    pattern: String::new(),
                    reason: "empty pattern".to_string(),
                });
            }
            let compiled = Pattern::new(p).map_err(|e| ConfigError::Pattern {
                pattern: p.to_string(),
                reason: e.msg.to_string(),
            })?;
            patterns.push(compiled);
        }
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// True if any pattern matches `name`.
    pub fn matches(&self, name: &str) -> bool {
        self.first_match(name).is_some()
    }

    /// The first pattern (in declaration order) matching `name`.
    pub fn first_match(&self, name: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|p| p.matches_with(name, MATCH_OPTIONS))
            .map(|p| p.as_str())
    }

    /// Pattern source strings, in order.
    pub fn sources(&self) -> Vec<String> {
        self.patterns.iter().map(|p| p.as_str().to_string()).collect()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
