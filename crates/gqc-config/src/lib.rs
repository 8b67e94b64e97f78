//! Glider QC configuration loading and validation.
//!
//! This crate provides:
//! - Typed test specifications handed to an external test battery
//! - The immutable per-run [`QcConfig`]
//! - Versioned presets for the supported QC conventions
//! - Hashed config bundles for reproducible runs
//! - Semantic validation

pub mod bundle;
pub mod preset;
pub mod qc_config;
pub mod test_spec;
pub mod validate;

pub use bundle::{ConfigBundle, ConfigBundleError};
pub use preset::{get_preset, list_presets, PresetError, PresetInfo, PresetName};
pub use qc_config::{MaskingConfig, OverrideRuleConfig, QcConfig};
pub use test_spec::{GroupTestConfig, TestSpec, VariableTests};
pub use validate::{validate_config, ValidationError, ValidationResult};

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = gqc_common::SCHEMA_VERSION;
