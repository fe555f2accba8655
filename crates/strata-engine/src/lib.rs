//! # strata-engine
//!
//! The resolution core of the strata context engine:
//!
//! - [`resolver::InheritanceResolver`] — walks the GLOBAL → PROJECT →
//!   BRANCH → TASK ancestor chain and deep-merges it, most specific wins
//! - [`cache::ResolutionCache`] — TTL + write-invalidated memoization of
//!   resolved views and level records, with a reverse dependency index so
//!   an ancestor write evicts every dependent view before it returns
//! - [`delegation`] — bounded queue and background worker for audited,
//!   asynchronous upward pushes of context data
//! - [`service::ContextService`] — the async operation surface consumed
//!   by the transport layer
//!
//! ## Crate Position
//!
//! Top of the workspace. Depends on `strata-core` and `strata-store`.

#![deny(unsafe_code)]

pub mod cache;
pub mod config;
pub mod delegation;
pub mod errors;
pub mod metrics;
pub mod resolver;
pub mod service;

pub use config::EngineConfig;
pub use errors::{EngineError, Result};
pub use service::{ContextService, GetResult};
