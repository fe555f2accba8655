//! # strata-core
//!
//! Foundation types and algorithms for the strata context engine.
//!
//! This crate provides the shared vocabulary that the store and engine
//! crates depend on:
//!
//! - **Levels**: [`level::ContextLevel`] — the GLOBAL → PROJECT → BRANCH →
//!   TASK containment hierarchy and its parent/chain arithmetic
//! - **Keys**: [`level::ContextKey`] — a (level, context id) pair
//! - **Records**: [`types::ContextRecord`] with its dynamic JSON `data` map
//! - **Views**: [`types::ResolvedView`] — the deep-merged view of a context
//!   and all its ancestors
//! - **Delegation**: [`types::DelegationEntry`] audit entries
//! - **Annotations**: [`types::InsightEntry`] and [`types::ProgressEntry`]
//! - **Merge**: [`merge::deep_merge`] / [`merge::deep_merge_strict`]
//! - **Schema hooks**: [`schema::SchemaHook`] per-level normalization
//! - **Logging**: [`logging::init_logging`] tracing setup
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by `strata-store` and `strata-engine`.

#![deny(unsafe_code)]

pub mod errors;
pub mod level;
pub mod logging;
pub mod merge;
pub mod schema;
pub mod types;
