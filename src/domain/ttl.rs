//! Cache lifetime table.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::DomainError;
use super::layout::LayoutNode;

/// Suffix appended to a layout kind when the block shows a randomized list.
pub const RANDOM_SUFFIX: &str = "_random";
/// `display_mode` value marking a randomized list.
pub const RANDOM_DISPLAY_MODE: &str = "random";

/// How lifetimes of several layouts in one document combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlPolicy {
    /// The first layout with a table entry, in document order, decides.
    #[default]
    FirstMatch,
    /// The shortest lifetime among all layouts and the default decides.
    Minimum,
}

impl TtlPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            TtlPolicy::FirstMatch => "first_match",
            TtlPolicy::Minimum => "minimum",
        }
    }
}

impl FromStr for TtlPolicy {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "first_match" | "first-match" => Ok(TtlPolicy::FirstMatch),
            "minimum" | "min" => Ok(TtlPolicy::Minimum),
            other => Err(DomainError::validation(format!(
                "unknown ttl policy `{other}` (expected first_match or minimum)"
            ))),
        }
    }
}

impl fmt::Display for TtlPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifetimes per layout key plus the site-wide default.
///
/// A layout key is the layout kind, suffixed with [`RANDOM_SUFFIX`] when the
/// block is randomized. Keys without an entry fall back to the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlTable {
    default_ttl: u32,
    layouts: BTreeMap<String, u32>,
    random_kinds: BTreeSet<String>,
    policy: TtlPolicy,
}

impl TtlTable {
    pub fn new(default_ttl: u32) -> Self {
        Self {
            default_ttl,
            layouts: BTreeMap::new(),
            random_kinds: BTreeSet::new(),
            policy: TtlPolicy::default(),
        }
    }

    pub fn with_layout(mut self, key: impl Into<String>, ttl: u32) -> Self {
        self.layouts.insert(key.into(), ttl);
        self
    }

    /// Treat every block of `kind` as randomized, whatever its display mode.
    pub fn with_random_kind(mut self, kind: impl Into<String>) -> Self {
        self.random_kinds.insert(kind.into());
        self
    }

    pub fn with_policy(mut self, policy: TtlPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn default_ttl(&self) -> u32 {
        self.default_ttl
    }

    pub fn policy(&self) -> TtlPolicy {
        self.policy
    }

    pub fn is_random(&self, node: &LayoutNode) -> bool {
        node.display_mode.as_deref() == Some(RANDOM_DISPLAY_MODE)
            || self.random_kinds.contains(node.kind.as_str())
    }

    pub fn layout_key(&self, node: &LayoutNode) -> String {
        if self.is_random(node) {
            format!("{}{RANDOM_SUFFIX}", node.kind.as_str())
        } else {
            node.kind.as_str().to_string()
        }
    }

    pub fn lookup(&self, key: &str) -> Option<u32> {
        self.layouts.get(key).copied()
    }

    /// Lifetime of a single block, if the table knows its layout key.
    pub fn ttl_for(&self, node: &LayoutNode) -> Option<u32> {
        self.lookup(&self.layout_key(node))
    }
}
