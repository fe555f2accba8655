//! Foundation error types shared across the strata crates.

use thiserror::Error;

/// Failed to parse a string into a [`crate::level::ContextLevel`].
#[derive(Debug, Clone, Error)]
#[error("invalid context level: {0:?} (expected global|project|branch|task)")]
pub struct LevelParseError(pub String);

/// Deep-merge failure in strict mode.
///
/// Only strict merges fail: merging a map into a non-map (or the reverse)
/// at some path. Lenient merges always succeed by letting the overlay
/// replace the base value.
#[derive(Debug, Clone, Error)]
#[error("unresolvable merge conflict at {path:?}: cannot merge {overlay_kind} over {base_kind}")]
pub struct MergeConflict {
    /// Dot-joined path of the conflicting key.
    pub path: String,
    /// JSON kind of the existing value ("object", "array", "string", ...).
    pub base_kind: &'static str,
    /// JSON kind of the overlaid value.
    pub overlay_kind: &'static str,
}
