//! Machine-readable JSON output.

use serde::Serialize;

use crate::error::Result;

/// Render any serializable value as JSON.
///
/// # Errors
/// Returns an error if serialization fails.
pub fn render_json<T: Serialize + ?Sized>(value: &T, pretty: bool) -> Result<String> {
    if pretty {
        Ok(serde_json::to_string_pretty(value)?)
    } else {
        Ok(serde_json::to_string(value)?)
    }
}
