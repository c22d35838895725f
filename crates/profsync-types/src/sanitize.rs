//! Field sanitization seam
//!
//! Cleaning rules belong to the caller. The core only guarantees that
//! nothing reaches a [`PendingEdit`] without passing through a
//! [`Sanitizer`] first.

use crate::edit::{FieldValue, PendingEdit};

/// A raw value the sanitizer refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("field {field} rejected: {reason}")]
pub struct Rejected {
    /// Field that was refused
    pub field: String,
    /// Human-readable reason
    pub reason: String,
}

impl Rejected {
    /// Create rejection
    #[inline]
    #[must_use]
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Cleans field values before they enter the core
pub trait Sanitizer: Send + Sync {
    /// Clean one raw value
    ///
    /// # Errors
    /// [`Rejected`] if the value must not be stored
    fn clean(&self, field: &str, raw: FieldValue) -> Result<FieldValue, Rejected>;

    /// Clean every field of an edit; first rejection wins
    ///
    /// # Errors
    /// [`Rejected`] for the first refused field
    fn clean_edit(&self, raw: PendingEdit) -> Result<PendingEdit, Rejected> {
        let mut clean = PendingEdit::new();
        for (field, value) in raw.iter() {
            clean.set(field, self.clean(field, value.clone())?);
        }
        Ok(clean)
    }
}

/// Accepts everything unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughSanitizer;

impl Sanitizer for PassthroughSanitizer {
    #[inline]
    fn clean(&self, _field: &str, raw: FieldValue) -> Result<FieldValue, Rejected> {
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NoScripts;

    impl Sanitizer for NoScripts {
        fn clean(&self, field: &str, raw: FieldValue) -> Result<FieldValue, Rejected> {
            match raw.as_str() {
                Some(s) if s.contains("<script") => Err(Rejected::new(field, "markup")),
                Some(s) => Ok(json!(s.trim())),
                None => Ok(raw),
            }
        }
    }

    #[test]
    fn passthrough_keeps_value() {
        assert_eq!(
            PassthroughSanitizer.clean("bio", json!("x")).unwrap(),
            json!("x")
        );
    }

    #[test]
    fn clean_edit_applies_per_field() {
        let raw = PendingEdit::single("bio", json!("  hi ")).with("age", json!(3));
        let clean = NoScripts.clean_edit(raw).unwrap();
        assert_eq!(clean.get("bio"), Some(&json!("hi")));
        assert_eq!(clean.get("age"), Some(&json!(3)));
    }

    #[test]
    fn clean_edit_stops_at_rejection() {
        let raw = PendingEdit::single("bio", json!("<script>"));
        let err = NoScripts.clean_edit(raw).unwrap_err();
        assert_eq!(err.field, "bio");
    }
}
