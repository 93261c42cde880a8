//! `{{key}}` placeholder substitution for step inputs.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

use tripwire_core::field::FieldValues;

use crate::variables::Variables;

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{\{([^{}]+)\}\}").expect("placeholder pattern"))
}

/// Text used when a variable is spliced into a string.
pub fn stringify(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s),
        other => Cow::Owned(other.to_string()),
    }
}

/// Replace every `{{key}}` in `text` whose key is in `vars`.
///
/// One pass: inserted text is never re-scanned, and unknown placeholders are
/// left as written.
pub fn render<'t>(text: &'t str, vars: &Variables) -> Cow<'t, str> {
    placeholder().replace_all(text, |caps: &Captures| match vars.get(&caps[1]) {
        Some(value) => stringify(value).into_owned(),
        None => caps[0].to_string(),
    })
}

/// Substitute placeholders in every top-level string value. Other values are
/// copied unchanged.
pub fn substitute(inputs: &FieldValues, vars: &Variables) -> FieldValues {
    inputs
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(text) => Value::String(render(text, vars).into_owned()),
                other => other.clone(),
            };
            (key.clone(), value)
        })
        .collect()
}
