//! The immutable configuration for one QC run.

use chrono::NaiveDate;
use gqc_common::{FlagScale, FlagValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::test_spec::GroupTestConfig;

/// Everything a pipeline run needs besides the dataset and the battery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcConfig {
    pub schema_version: String,

    /// Preset this config was built from (or a free-form label).
    pub preset: String,

    /// Flag convention used by every series in the run.
    pub scale: FlagScale,

    /// Battery description used in flag comments,
    /// e.g. "IOOS QC QARTOD https://github.com/ioos/ioos_qc".
    pub battery_label: String,

    /// Per primary variable test configuration.
    pub variable_tests: BTreeMap<String, GroupTestConfig>,

    /// Dedicated group tests for derived variables. When present and
    /// runnable, these take precedence over plain dependency propagation.
    #[serde(default)]
    pub group_tests: BTreeMap<String, GroupTestConfig>,

    #[serde(default)]
    pub overrides: Vec<OverrideRuleConfig>,

    #[serde(default)]
    pub masking: MaskingConfig,

    pub processing_level: String,

    pub disclaimer: String,
}

impl QcConfig {
    /// Test configuration for a primary variable, if any.
    pub fn tests_for(&self, variable: &str) -> Option<&GroupTestConfig> {
        self.variable_tests.get(variable)
    }

    /// Dedicated group test for a derived variable, if any.
    pub fn group_test_for(&self, variable: &str) -> Option<&GroupTestConfig> {
        self.group_tests.get(variable)
    }
}

/// A known-defect rule: when the instrument metadata matches, the target
/// variable's flags are floored at `minimum_flag`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRuleConfig {
    pub name: String,

    /// Variable whose flag series is floored.
    pub target: String,

    /// Dataset attribute holding the instrument metadata string.
    pub metadata_attribute: String,

    /// Metadata field with the instrument make/model.
    #[serde(default = "default_family_field")]
    pub family_field: String,

    /// Case-insensitive substring identifying the affected family.
    pub family_marker: String,

    /// Metadata field with the ISO calibration date.
    #[serde(default = "default_calibration_field")]
    pub calibration_field: String,

    /// Calibrations strictly before this date are affected.
    pub calibrated_before: NaiveDate,

    pub minimum_flag: FlagValue,

    /// Prepended to the target flag comment when the rule fires.
    pub comment: String,
}

fn default_family_field() -> String {
    "make_model".to_string()
}

fn default_calibration_field() -> String {
    "calibration_date".to_string()
}

/// Acceptance thresholds for the masking stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskingConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Values whose flag is strictly worse than this are blanked.
    #[serde(default = "default_threshold")]
    pub default_threshold: FlagValue,

    /// Per-variable overrides of `default_threshold`.
    #[serde(default)]
    pub thresholds: BTreeMap<String, FlagValue>,
}

fn default_threshold() -> FlagValue {
    2
}

impl Default for MaskingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_threshold: default_threshold(),
            thresholds: BTreeMap::new(),
        }
    }
}

impl MaskingConfig {
    pub fn threshold_for(&self, variable: &str) -> FlagValue {
        self.thresholds
            .get(variable)
            .copied()
            .unwrap_or(self.default_threshold)
    }
}
