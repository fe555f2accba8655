//! Engine error hierarchy.

use strata_core::level::ContextLevel;
use strata_store::StoreError;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the resolver, queue, and service facade.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Store failure, propagated unchanged (including `ContextNotFound`
    /// and `ParentNotFound`).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Delegation must flow upward: the target level is not a proper
    /// ancestor of the source level.
    #[error("invalid delegation direction: {target_level} is not an ancestor of {source_level}")]
    InvalidDelegationDirection {
        /// Level the delegation originates from.
        source_level: ContextLevel,
        /// Requested target level.
        target_level: ContextLevel,
    },

    /// The bounded delegation queue is at capacity. Nothing was enqueued
    /// or persisted; the caller may retry.
    #[error("delegation queue full")]
    QueueFull,

    /// The delegation worker has shut down.
    #[error("delegation queue closed")]
    QueueClosed,

    /// Resolution exceeded the caller's deadline. The partial computation
    /// was discarded; nothing entered the cache.
    #[error("resolution timed out for {level}:{context_id}")]
    ResolveTimeout {
        /// Level of the timed-out resolution.
        level: ContextLevel,
        /// Context id of the timed-out resolution.
        context_id: String,
    },

    /// A write rejected by the installed schema hook.
    #[error(transparent)]
    Schema(#[from] strata_core::schema::SchemaViolation),

    /// Invariant violation inside the engine.
    #[error("internal engine error: {0}")]
    Internal(String),
}
