//! Credential redaction.
//!
//! Secrets never reach logs or serialized output in full.

use serde::Serializer;

/// Number of leading characters kept visible.
const VISIBLE_PREFIX: usize = 4;

/// Mask a secret, keeping a short prefix for identification.
#[must_use]
pub fn mask_secret(secret: &str) -> String {
    let chars = secret.chars().count();
    if chars <= VISIBLE_PREFIX * 2 {
        return "****".to_string();
    }
    let prefix: String = secret.chars().take(VISIBLE_PREFIX).collect();
    format!("{prefix}****")
}

/// Remove every occurrence of `secret` from `text`.
///
/// Used on upstream error bodies, which sometimes echo the presented key.
#[must_use]
pub fn scrub(text: &str, secret: Option<&str>) -> String {
    match secret {
        Some(secret) if !secret.is_empty() => text.replace(secret, &mask_secret(secret)),
        _ => text.to_string(),
    }
}

/// Serde helper for optional secret fields.
///
/// # Errors
/// Propagates serializer errors.
#[allow(clippy::ref_option)]
pub fn serialize_secret<S: Serializer>(
    value: &Option<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(secret) => serializer.serialize_str(&mask_secret(secret)),
        None => serializer.serialize_none(),
    }
}
