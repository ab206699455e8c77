//! Secret placeholder resolution and redaction.
//!
//! Text fields on sources and sinks refer to secrets as `__NAME__` tokens.
//! Resolution substitutes real values immediately before use; redaction
//! rewrites values back to token form before anything is persisted or
//! logged. Nothing outside this module may format a secret value.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::data::models::Secret;
use crate::error::{Error, Result};

/// Render the placeholder token for a secret name.
pub fn placeholder(name: &str) -> String {
    format!("__{name}__")
}

/// Substitute `__NAME__` tokens in `text` for each name in `names`.
///
/// Duplicate names are applied once. A name missing from `values` is a
/// validation error. Text without placeholders passes through untouched, so
/// the function is idempotent on already-resolved text.
pub fn resolve_placeholders(
    names: &[String],
    values: &HashMap<String, String>,
    text: &str,
) -> Result<String> {
    if names.is_empty() || !text.contains("__") {
        return Ok(text.to_owned());
    }

    let mut resolved = text.to_owned();
    let mut seen: Vec<&str> = Vec::with_capacity(names.len());
    for name in names {
        if seen.contains(&name.as_str()) {
            continue;
        }
        seen.push(name);

        let token = placeholder(name);
        if !resolved.contains(&token) {
            continue;
        }
        let value = values.get(name).ok_or_else(|| {
            Error::validation_field("secrets", format!("unknown secret '{name}'"))
        })?;
        resolved = resolved.replace(&token, value);
    }
    Ok(resolved)
}

/// Rewrites secret values back to `__NAME__` form.
///
/// Values are matched longest-first so a secret that is a substring of
/// another cannot shadow it.
pub struct Redactor {
    // (value, token), sorted by value length descending
    replacements: Vec<(String, String)>,
}

impl Redactor {
    pub fn new(secrets: &HashMap<String, String>) -> Self {
        let mut replacements: Vec<(String, String)> = secrets
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(name, value)| (value.clone(), placeholder(name)))
            .collect();
        replacements.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Redactor { replacements }
    }

    pub fn redact_str(&self, text: &str) -> String {
        let mut out = text.to_owned();
        for (value, token) in &self.replacements {
            if out.contains(value.as_str()) {
                out = out.replace(value.as_str(), token);
            }
        }
        out
    }

    /// Redact every value in a header map. Header names are left alone.
    pub fn redact_headers(&self, headers: &HashMap<String, String>) -> HashMap<String, String> {
        headers
            .iter()
            .map(|(name, value)| (name.clone(), self.redact_str(value)))
            .collect()
    }
}

/// Fetches a fresh value for a secret with a configured provider script.
///
/// Script execution mechanics belong to an external collaborator; the core
/// only drives the refresh lifecycle around this seam.
#[async_trait]
pub trait SecretValueProvider: Send + Sync {
    async fn fetch(&self, secret: &Secret) -> anyhow::Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn resolves_each_occurrence() {
        let vals = values(&[("TKN", "abc")]);
        let out = resolve_placeholders(
            &["TKN".into()],
            &vals,
            "token=__TKN__&again=__TKN__",
        )
        .unwrap();
        assert_eq!(out, "token=abc&again=abc");
    }

    #[test]
    fn missing_name_fails() {
        let vals = values(&[]);
        let err = resolve_placeholders(&["NOPE".into()], &vals, "x=__NOPE__").unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn no_placeholder_text_is_untouched() {
        let vals = values(&[("TKN", "abc")]);
        let out = resolve_placeholders(&["TKN".into()], &vals, "plain text").unwrap();
        assert_eq!(out, "plain text");
    }

    #[test]
    fn duplicate_names_apply_once() {
        let vals = values(&[("A", "1")]);
        let out =
            resolve_placeholders(&["A".into(), "A".into()], &vals, "__A__").unwrap();
        assert_eq!(out, "1");
    }

    #[test]
    fn resolve_is_idempotent_without_placeholders() {
        let vals = values(&[("TKN", "abc")]);
        let once = resolve_placeholders(&["TKN".into()], &vals, "no tokens here").unwrap();
        let twice = resolve_placeholders(&["TKN".into()], &vals, &once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn redactor_inverts_resolution_for_token_only_text() {
        let vals = values(&[("TKN", "abc"), ("KEY", "zzz")]);
        let original = "__TKN__:__KEY__";
        let resolved =
            resolve_placeholders(&["TKN".into(), "KEY".into()], &vals, original).unwrap();
        assert_eq!(resolved, "abc:zzz");

        let redactor = Redactor::new(&vals);
        assert_eq!(redactor.redact_str(&resolved), original);
    }

    #[test]
    fn redactor_prefers_longer_values() {
        // "abcdef" contains "abc"; the longer secret must win.
        let vals = values(&[("SHORT", "abc"), ("LONG", "abcdef")]);
        let redactor = Redactor::new(&vals);
        assert_eq!(redactor.redact_str("x=abcdef"), "x=__LONG__");
    }

    #[test]
    fn redact_headers_rewrites_values_only() {
        let vals = values(&[("TKN", "abc")]);
        let redactor = Redactor::new(&vals);
        let headers = values(&[("X-API-Key", "abc"), ("Accept", "application/json")]);
        let redacted = redactor.redact_headers(&headers);
        assert_eq!(redacted["X-API-Key"], "__TKN__");
        assert_eq!(redacted["Accept"], "application/json");
    }
}
