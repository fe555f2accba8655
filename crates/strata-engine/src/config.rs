//! Engine configuration.

use std::time::Duration;

/// Tunables for the cache, queue, and resolution paths.
///
/// Compiled defaults are production-reasonable; construct with struct
/// update syntax to override individual fields.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// How long a cached view or record stays valid without an
    /// intervening write.
    pub cache_ttl: Duration,
    /// Bounded delegation queue capacity. A full queue surfaces
    /// `QueueFull` to callers instead of growing without limit.
    pub queue_capacity: usize,
    /// Deadline for a single `resolve` call.
    pub resolve_timeout: Duration,
    /// How many leftover PENDING delegations to re-enqueue per batch at
    /// startup.
    pub recovery_batch: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(60),
            queue_capacity: 256,
            resolve_timeout: Duration::from_secs(5),
            recovery_batch: 256,
        }
    }
}
