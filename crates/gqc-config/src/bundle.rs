//! Versioned, hashed config bundles.
//!
//! A `ConfigBundle` wraps a [`QcConfig`] with a format version and a SHA-256
//! hash of the config JSON. The hash is verified on load so a flagged dataset
//! can be traced back to exactly the thresholds that produced it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::preset::{get_preset, PresetName};
use crate::qc_config::QcConfig;
use crate::validate::{validate_config, ValidationError};

/// A versioned, integrity-checked QC configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigBundle {
    /// Bundle format version.
    pub bundle_version: String,

    pub config: QcConfig,

    /// SHA-256 hash of the JSON-serialized `config` field.
    #[serde(default)]
    pub config_hash: Option<String>,

    /// What changed relative to the preset this bundle started from.
    #[serde(default)]
    pub changelog: Option<String>,

    /// ISO-8601 timestamp of bundle creation.
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigBundleError {
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("config hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("unsupported bundle version: {0}")]
    UnsupportedVersion(String),

    #[error("invalid config: {0}")]
    Invalid(#[from] ValidationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ConfigBundleError> for gqc_common::Error {
    fn from(e: ConfigBundleError) -> Self {
        match e {
            ConfigBundleError::Io(io) => gqc_common::Error::Io(io),
            ConfigBundleError::Invalid(v) => gqc_common::Error::Config(v.to_string()),
            other => gqc_common::Error::BundleIntegrity(other.to_string()),
        }
    }
}

impl ConfigBundle {
    pub const CURRENT_VERSION: &'static str = "1.0.0";

    /// Wrap a config, computing its integrity hash.
    pub fn new(config: QcConfig) -> Result<Self, ConfigBundleError> {
        let hash = config_hash(&config)?;
        Ok(Self {
            bundle_version: Self::CURRENT_VERSION.to_string(),
            config,
            config_hash: Some(hash),
            changelog: None,
            created_at: Some(chrono::Utc::now().to_rfc3339()),
        })
    }

    /// Bundle a preset as-is.
    pub fn from_preset(name: PresetName) -> Result<Self, ConfigBundleError> {
        Self::new(get_preset(name))
    }

    /// Parse a bundle from JSON, verifying integrity and validating the config.
    pub fn from_json(json: &str) -> Result<Self, ConfigBundleError> {
        let bundle: ConfigBundle = serde_json::from_str(json)?;
        bundle.verify_integrity()?;
        validate_config(&bundle.config)?;
        Ok(bundle)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigBundleError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn verify_integrity(&self) -> Result<(), ConfigBundleError> {
        if self.bundle_version != Self::CURRENT_VERSION {
            return Err(ConfigBundleError::UnsupportedVersion(
                self.bundle_version.clone(),
            ));
        }

        if let Some(expected) = &self.config_hash {
            let actual = config_hash(&self.config)?;
            if *expected != actual {
                return Err(ConfigBundleError::HashMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        Ok(())
    }

    pub fn to_json(&self) -> Result<String, ConfigBundleError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn config_hash(config: &QcConfig) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(config)?;
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}
