//! Stateless per-table repositories. Every method takes `&Connection`.

pub mod annotation;
pub mod context;
pub mod delegation;
