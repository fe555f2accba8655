//! High-level transactional store API.

pub mod context_store;
