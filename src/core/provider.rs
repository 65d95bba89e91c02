//! Provider kinds.
//!
//! The closed set of upstream account types quotad knows how to poll.

use serde::{Deserialize, Serialize};

use crate::error::{QuotadError, Result};

/// Supported quota providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenRouter,
    DeepSeek,
    Moonshot,
}

impl ProviderKind {
    /// All providers in display order.
    pub const ALL: &'static [Self] = &[Self::OpenRouter, Self::DeepSeek, Self::Moonshot];

    /// Stable identifier used in config files and the `services.provider` column.
    #[must_use]
    pub const fn cli_name(self) -> &'static str {
        match self {
            Self::OpenRouter => "openrouter",
            Self::DeepSeek => "deepseek",
            Self::Moonshot => "moonshot",
        }
    }

    /// Display name for human output.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::OpenRouter => "OpenRouter",
            Self::DeepSeek => "DeepSeek",
            Self::Moonshot => "Moonshot AI",
        }
    }

    /// Base URL used when the service has no override.
    #[must_use]
    pub const fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenRouter => "https://openrouter.ai",
            Self::DeepSeek => "https://api.deepseek.com",
            Self::Moonshot => "https://api.moonshot.ai",
        }
    }

    /// Parse from a config or database value.
    ///
    /// # Errors
    /// Returns [`QuotadError::InvalidProvider`] for unknown names.
    pub fn from_cli_name(name: &str) -> Result<Self> {
        let lower = name.trim().to_lowercase();
        Self::ALL
            .iter()
            .find(|p| p.cli_name() == lower)
            .copied()
            .ok_or_else(|| QuotadError::InvalidProvider(name.to_string()))
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.cli_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_cli_name_is_case_insensitive() {
        assert_eq!(
            ProviderKind::from_cli_name("OpenRouter").unwrap(),
            ProviderKind::OpenRouter
        );
        assert_eq!(
            ProviderKind::from_cli_name(" deepseek ").unwrap(),
            ProviderKind::DeepSeek
        );
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let err = ProviderKind::from_cli_name("nope").unwrap_err();
        assert!(matches!(err, QuotadError::InvalidProvider(name) if name == "nope"));
    }

    #[test]
    fn cli_names_round_trip() {
        for &kind in ProviderKind::ALL {
            assert_eq!(ProviderKind::from_cli_name(kind.cli_name()).unwrap(), kind);
        }
    }
}
