//! Store error hierarchy.

use strata_core::level::ContextLevel;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by the context store and its repositories.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying `SQLite` failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool exhausted or broken.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Stored JSON failed to (de)serialize.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No record exists for the requested (level, context id).
    #[error("context not found: {level}:{context_id}")]
    ContextNotFound {
        /// Requested level.
        level: ContextLevel,
        /// Requested context id.
        context_id: String,
    },

    /// A write referenced a parent that does not exist. Writes fail
    /// closed: inheritance correctness depends on a resolvable chain.
    #[error("parent not found: {parent_level}:{parent_id} (required by write to {level}:{context_id})")]
    ParentNotFound {
        /// Level of the rejected write.
        level: ContextLevel,
        /// Context id of the rejected write.
        context_id: String,
        /// Missing parent's level.
        parent_level: ContextLevel,
        /// Missing parent's id.
        parent_id: String,
    },

    /// A write omitted the parent reference its level requires.
    #[error("missing parent reference for write to {level}:{context_id}: {missing}")]
    MissingParentRef {
        /// Level of the rejected write.
        level: ContextLevel,
        /// Context id of the rejected write.
        context_id: String,
        /// Name of the absent ref field.
        missing: &'static str,
    },

    /// No delegation entry exists with the given id.
    #[error("delegation entry not found: {0}")]
    DelegationNotFound(String),

    /// Strict merge rejected a delegation payload.
    #[error(transparent)]
    MergeConflict(#[from] strata_core::errors::MergeConflict),

    /// Invariant violation inside the store.
    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Shorthand for [`StoreError::ContextNotFound`].
    #[must_use]
    pub fn context_not_found(level: ContextLevel, context_id: &str) -> Self {
        Self::ContextNotFound {
            level,
            context_id: context_id.to_string(),
        }
    }
}
