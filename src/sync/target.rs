// Keyward — Sync targets
//
// A destination plus the rules deciding which names it receives. Targets are
// resolved against store entries at sync time; nothing is statically
// assigned.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::pattern::PatternList;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Private,
    Internal,
    Public,
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visibility::Private => write!(f, "private"),
            Visibility::Internal => write!(f, "internal"),
            Visibility::Public => write!(f, "public"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncTarget {
    pub destination_id: String,
    include: PatternList,
    exclude: PatternList,
    pub visibility: Visibility,
}

impl SyncTarget {
    pub fn new<S: AsRef<str>>(
        destination_id: impl Into<String>,
        include: &[S],
        exclude: &[S],
        visibility: Visibility,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            destination_id: destination_id.into(),
            include: PatternList::compile(include)?,
            exclude: PatternList::compile(exclude)?,
            visibility,
        })
    }

    pub fn is_private(&self) -> bool {
        self.visibility == Visibility::Private
    }

    /// Exclude wins over include. An empty include list admits every name
    /// that is not excluded.
    pub fn admits(&self, name: &str) -> bool {
        if self.exclude.matches(name) {
            return false;
        }
        self.include.is_empty() || self.include.matches(name)
    }

    pub fn include_patterns(&self) -> Vec<String> {
        self.include.sources()
    }

    pub fn exclude_patterns(&self) -> Vec<String> {
        self.exclude.sources()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
