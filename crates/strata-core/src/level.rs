//! The containment hierarchy: GLOBAL → PROJECT → BRANCH → TASK.
//!
//! Every context lives at exactly one level. Levels form a fixed four-deep
//! chain; [`ContextLevel::parent`] and [`ContextLevel::chain`] encode the
//! inheritance order used by the resolver.

use serde::{Deserialize, Serialize};

use crate::errors::LevelParseError;

/// A level in the context hierarchy.
///
/// Ordering follows containment: `Global < Project < Branch < Task`, so a
/// lower level is an ancestor of a higher one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextLevel {
    /// Per-user root. `context_id` is the owner (user) id.
    Global,
    /// Per-project. `context_id` is the project id.
    Project,
    /// Per-branch. `context_id` is the branch id.
    Branch,
    /// Per-task, the most specific level. `context_id` is the task id.
    Task,
}

impl ContextLevel {
    /// All levels in ancestor-to-descendant order.
    pub const ALL: [Self; 4] = [Self::Global, Self::Project, Self::Branch, Self::Task];

    /// The immediate parent level, or `None` for `Global`.
    #[must_use]
    pub fn parent(self) -> Option<Self> {
        match self {
            Self::Global => None,
            Self::Project => Some(Self::Global),
            Self::Branch => Some(Self::Project),
            Self::Task => Some(Self::Branch),
        }
    }

    /// The inheritance chain from `Global` down to (and including) this
    /// level, in merge order.
    #[must_use]
    pub fn chain(self) -> &'static [Self] {
        match self {
            Self::Global => &[Self::Global],
            Self::Project => &[Self::Global, Self::Project],
            Self::Branch => &[Self::Global, Self::Project, Self::Branch],
            Self::Task => &[Self::Global, Self::Project, Self::Branch, Self::Task],
        }
    }

    /// Depth in the hierarchy: `Global` = 0 … `Task` = 3.
    #[must_use]
    pub fn depth(self) -> usize {
        self as usize
    }

    /// Whether `self` is a proper ancestor of `other`.
    ///
    /// Delegation is only valid from a descendant to a proper ancestor.
    #[must_use]
    pub fn is_ancestor_of(self, other: Self) -> bool {
        self.depth() < other.depth()
    }

    /// SQL string representation (matches the `contexts.level` CHECK
    /// constraint values).
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Project => "project",
            Self::Branch => "branch",
            Self::Task => "task",
        }
    }
}

impl std::fmt::Display for ContextLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl std::str::FromStr for ContextLevel {
    type Err = LevelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(Self::Global),
            "project" => Ok(Self::Project),
            "branch" => Ok(Self::Branch),
            "task" => Ok(Self::Task),
            other => Err(LevelParseError(other.to_string())),
        }
    }
}

/// A (level, context id) pair — the addressing unit for records, resolved
/// views, and cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextKey {
    /// Hierarchy level.
    pub level: ContextLevel,
    /// Level-scoped context id.
    pub context_id: String,
}

impl ContextKey {
    /// Create a key from a level and id.
    #[must_use]
    pub fn new(level: ContextLevel, context_id: impl Into<String>) -> Self {
        Self {
            level,
            context_id: context_id.into(),
        }
    }
}

impl std::fmt::Display for ContextKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.level, self.context_id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_chain() {
        assert_eq!(ContextLevel::Global.parent(), None);
        assert_eq!(ContextLevel::Task.parent(), Some(ContextLevel::Branch));
        assert_eq!(
            ContextLevel::Task.chain(),
            &[
                ContextLevel::Global,
                ContextLevel::Project,
                ContextLevel::Branch,
                ContextLevel::Task
            ]
        );
        assert_eq!(ContextLevel::Global.chain(), &[ContextLevel::Global]);
    }

    #[test]
    fn ancestor_predicate() {
        assert!(ContextLevel::Global.is_ancestor_of(ContextLevel::Task));
        assert!(ContextLevel::Project.is_ancestor_of(ContextLevel::Branch));
        assert!(!ContextLevel::Task.is_ancestor_of(ContextLevel::Task));
        assert!(!ContextLevel::Task.is_ancestor_of(ContextLevel::Global));
    }

    #[test]
    fn sql_round_trip() {
        for level in ContextLevel::ALL {
            let parsed: ContextLevel = level.as_sql().parse().unwrap();
            assert_eq!(parsed, level);
        }
        assert!("workspace".parse::<ContextLevel>().is_err());
    }

    #[test]
    fn serde_lowercase() {
        let json = serde_json::to_string(&ContextLevel::Branch).unwrap();
        assert_eq!(json, "\"branch\"");
        let back: ContextLevel = serde_json::from_str("\"task\"").unwrap();
        assert_eq!(back, ContextLevel::Task);
    }

    #[test]
    fn key_display() {
        let key = ContextKey::new(ContextLevel::Task, "T1");
        assert_eq!(key.to_string(), "task:T1");
    }
}
