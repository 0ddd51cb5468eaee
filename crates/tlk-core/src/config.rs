//! Configuration management

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tlk_crypto::varint::KeyIdEncoding;

use crate::group_keys::GROUP_KEY_KIND;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// What to do with spec v1 messages, which carry no authentication tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegacyPolicy {
    /// Refuse v1 traffic in both directions
    Reject,
    /// Process v1 traffic and mark results `Unauthenticated`
    #[default]
    Flag,
}

impl std::str::FromStr for LegacyPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reject" => Ok(LegacyPolicy::Reject),
            "flag" => Ok(LegacyPolicy::Flag),
            other => Err(ConfigError::Invalid(format!("unknown legacy policy: {}", other))),
        }
    }
}

/// E2EE engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct E2eeConfig {
    pub legacy_policy: LegacyPolicy,
    /// Spec version used for group messages when the caller names none
    pub default_spec_version: i32,
    /// Key-id chunks of incoming messages are zigzag varints
    pub compact_key_ids: bool,
    /// Kind argument passed when fetching group key envelopes
    pub group_key_kind: i32,
}

impl Default for E2eeConfig {
    fn default() -> Self {
        Self {
            legacy_policy: LegacyPolicy::Flag,
            default_spec_version: 2,
            compact_key_ids: false,
            group_key_kind: GROUP_KEY_KIND,
        }
    }
}

impl E2eeConfig {
    /// Load configuration from defaults, an optional TOML file and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // TOML file first so the environment can override it
        if let Ok(config_path) = std::env::var("TLK_E2EE_CONFIG") {
            config.load_from_toml(&config_path)?;
        }

        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a complete configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Replace this configuration with the contents of a TOML file
    pub fn load_from_toml<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path)?;
        *self = toml::from_str(&text)?;
        Ok(())
    }

    /// Apply `TLK_E2EE_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(policy) = lookup("TLK_E2EE_LEGACY_POLICY") {
            self.legacy_policy = policy.parse()?;
        }

        if let Some(compact) = lookup("TLK_E2EE_COMPACT_KEY_IDS") {
            self.compact_key_ids = match compact.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "TLK_E2EE_COMPACT_KEY_IDS must be true or false, got {}",
                        other
                    )))
                }
            };
        }

        if let Some(version) = lookup("TLK_E2EE_SPEC_VERSION") {
            self.default_spec_version = version
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("Invalid spec version: {}", e)))?;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.default_spec_version, 1 | 2) {
            return Err(ConfigError::Invalid(format!(
                "default_spec_version must be 1 or 2, got {}",
                self.default_spec_version
            )));
        }

        if self.default_spec_version == 1 && self.legacy_policy == LegacyPolicy::Reject {
            return Err(ConfigError::Invalid(
                "default_spec_version 1 conflicts with legacy_policy = reject".to_string(),
            ));
        }

        Ok(())
    }

    /// Encoding expected in the key-id chunks of incoming messages
    pub fn key_id_encoding(&self) -> KeyIdEncoding {
        KeyIdEncoding::from_compact_flag(self.compact_key_ids)
    }
}
