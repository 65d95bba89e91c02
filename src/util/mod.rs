//! Utility functions.

pub mod redact;
pub mod time;

pub use redact::{mask_secret, scrub};
pub use time::{format_relative, format_unix, now_unix, parse_legacy_timestamp};
