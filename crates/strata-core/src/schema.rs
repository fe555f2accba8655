//! Pluggable per-level data validation and normalization.
//!
//! The engine stores arbitrary JSON per level. Callers that want structure
//! (say, a fixed shape for TASK progress fields) install a [`SchemaHook`]
//! at service construction; the hook runs on every write before the data
//! reaches the store. The core never hardcodes level-specific schemas.

use serde_json::{Map, Value};

use crate::level::ContextLevel;

/// Validation/normalization hook applied to context data on write.
pub trait SchemaHook: Send + Sync {
    /// Validate and normalize `data` for a write at `level`.
    ///
    /// May mutate `data` in place (defaulting fields, coercing shapes).
    /// Returning an error rejects the write before anything is persisted.
    fn normalize(
        &self,
        level: ContextLevel,
        context_id: &str,
        data: &mut Map<String, Value>,
    ) -> Result<(), SchemaViolation>;
}

/// A write rejected by a [`SchemaHook`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("schema violation at {level}:{context_id}: {message}")]
pub struct SchemaViolation {
    /// Level of the rejected write.
    pub level: ContextLevel,
    /// Context id of the rejected write.
    pub context_id: String,
    /// What the hook objected to.
    pub message: String,
}

impl SchemaViolation {
    /// Build a violation for the given write.
    #[must_use]
    pub fn new(level: ContextLevel, context_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            context_id: context_id.into(),
            message: message.into(),
        }
    }
}

/// Hook that accepts every write unchanged. Installed by default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSchemaHook;

impl SchemaHook for NoopSchemaHook {
    fn normalize(
        &self,
        _level: ContextLevel,
        _context_id: &str,
        _data: &mut Map<String, Value>,
    ) -> Result<(), SchemaViolation> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct RequireTitle;

    impl SchemaHook for RequireTitle {
        fn normalize(
            &self,
            level: ContextLevel,
            context_id: &str,
            data: &mut Map<String, Value>,
        ) -> Result<(), SchemaViolation> {
            if level == ContextLevel::Task && !data.contains_key("title") {
                return Err(SchemaViolation::new(level, context_id, "task data requires a title"));
            }
            Ok(())
        }
    }

    #[test]
    fn hook_rejects_missing_field() {
        let mut data = Map::new();
        let err = RequireTitle
            .normalize(ContextLevel::Task, "T1", &mut data)
            .unwrap_err();
        assert!(err.to_string().contains("task:T1"));
    }

    #[test]
    fn hook_can_normalize_in_place() {
        struct DefaultTheme;
        impl SchemaHook for DefaultTheme {
            fn normalize(
                &self,
                level: ContextLevel,
                _context_id: &str,
                data: &mut Map<String, Value>,
            ) -> Result<(), SchemaViolation> {
                if level == ContextLevel::Global {
                    let _ = data.entry("theme").or_insert(json!("dark"));
                }
                Ok(())
            }
        }

        let mut data = Map::new();
        DefaultTheme
            .normalize(ContextLevel::Global, "U1", &mut data)
            .unwrap();
        assert_eq!(data["theme"], "dark");
    }

    #[test]
    fn noop_accepts_everything() {
        let mut data = Map::new();
        NoopSchemaHook
            .normalize(ContextLevel::Branch, "B1", &mut data)
            .unwrap();
        assert!(data.is_empty());
    }
}
