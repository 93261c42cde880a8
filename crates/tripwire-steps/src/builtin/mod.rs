pub mod clock;
pub mod compare;
pub mod file;
pub mod fork;
pub mod log;
pub mod message;
pub mod template;

use serde_json::Value;

/// Number greater than zero.
pub(crate) fn positive(value: &Value) -> bool {
    value.as_f64().map_or(false, |f| f > 0.0 && f.is_finite())
}

/// String with at least one non-whitespace character.
pub(crate) fn non_empty(value: &Value) -> bool {
    value.as_str().map_or(false, |s| !s.trim().is_empty())
}
