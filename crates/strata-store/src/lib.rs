//! # strata-store
//!
//! SQLite persistence for the strata context engine.
//!
//! Layered like the rest of the workspace expects:
//!
//! - [`sqlite::connection`] — r2d2 connection pool with WAL + pragmas
//! - [`sqlite::migrations`] — versioned, idempotent schema migrations
//! - [`sqlite::repositories`] — stateless per-table repositories, every
//!   method takes `&Connection`
//! - [`store::ContextStore`] — the transactional high-level API with
//!   per-(level, id) write locks, SQLITE_BUSY retry, parent validation,
//!   and the synchronous cache-invalidation hook
//!
//! ## Crate Position
//!
//! Depends on `strata-core`. Consumed by `strata-engine`.

#![deny(unsafe_code)]

pub mod errors;
pub mod sqlite;
pub mod store;

pub use errors::{Result, StoreError};
pub use store::context_store::{AnnotationQuery, ContextStore, InvalidationHook, ListFilter};
