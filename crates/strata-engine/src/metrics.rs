//! Metric name constants to avoid typos across modules.

/// Resolution cache hits (counter, labels: kind = view|record).
pub const CACHE_HITS_TOTAL: &str = "context_cache_hits_total";
/// Resolution cache misses (counter, labels: kind = view|record).
pub const CACHE_MISSES_TOTAL: &str = "context_cache_misses_total";
/// Cache entries evicted (counter, labels: cause = ttl|invalidation|cascade).
pub const CACHE_EVICTIONS_TOTAL: &str = "context_cache_evictions_total";
/// Invalidation cascades triggered by writes (counter).
pub const CACHE_INVALIDATIONS_TOTAL: &str = "context_cache_invalidations_total";
/// View insertions rejected because the chain changed mid-resolution (counter).
pub const CACHE_STALE_REJECTS_TOTAL: &str = "context_cache_stale_rejects_total";
/// Cache inconsistencies detected and recovered (counter). Always a bug.
pub const CACHE_INCONSISTENCIES_TOTAL: &str = "context_cache_inconsistencies_total";
/// Resolutions computed (counter, labels: level).
pub const RESOLUTIONS_TOTAL: &str = "context_resolutions_total";
/// Delegations enqueued (counter).
pub const DELEGATIONS_ENQUEUED_TOTAL: &str = "context_delegations_enqueued_total";
/// Delegations applied by the worker (counter).
pub const DELEGATIONS_APPLIED_TOTAL: &str = "context_delegations_applied_total";
/// Delegations failed by the worker (counter).
pub const DELEGATIONS_FAILED_TOTAL: &str = "context_delegations_failed_total";
/// Delegations rejected at enqueue for backpressure (counter).
pub const DELEGATIONS_REJECTED_TOTAL: &str = "context_delegations_rejected_total";
