//! Semantic validation for [`QcConfig`].
//!
//! Serde already guarantees the shape; these checks catch tables that parse
//! but cannot produce meaningful flags (inverted spans, thresholds outside
//! the flag scale, empty groups).

use gqc_common::schema::is_compatible;
use gqc_common::{FlagScale, FlagValue};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::qc_config::QcConfig;
use crate::test_spec::{GroupTestConfig, TestSpec};

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("incompatible schema version {0}")]
    IncompatibleSchema(String),

    #[error("group '{0}' has no variables")]
    EmptyGroup(String),

    #[error("group tests named '{0}' differ; shared names must share a config")]
    ConflictingGroup(String),

    #[error("{variable}: {test} is inverted or non-finite")]
    InvalidBounds { variable: String, test: String },

    #[error("{variable}: suspect span must lie inside fail span")]
    SuspectOutsideFail { variable: String },

    #[error("{context}: flag {flag} is not part of the {scale} scale")]
    FlagOutsideScale {
        context: String,
        flag: FlagValue,
        scale: FlagScale,
    },

    #[error("override '{0}' has an empty target, attribute, or family marker")]
    IncompleteOverride(String),
}

pub type ValidationResult = Result<(), ValidationError>;

impl From<ValidationError> for gqc_common::Error {
    fn from(e: ValidationError) -> Self {
        gqc_common::Error::Config(e.to_string())
    }
}

/// Validate a configuration, returning the first problem found.
pub fn validate_config(config: &QcConfig) -> ValidationResult {
    if !is_compatible(&config.schema_version) {
        return Err(ValidationError::IncompatibleSchema(
            config.schema_version.clone(),
        ));
    }

    for group in config.variable_tests.values().chain(config.group_tests.values()) {
        validate_group(group)?;
    }

    // Derived variables sharing a group name share one battery run.
    let mut by_name: BTreeMap<&str, &GroupTestConfig> = BTreeMap::new();
    for group in config.group_tests.values() {
        if let Some(seen) = by_name.insert(group.name.as_str(), group) {
            if seen != group {
                return Err(ValidationError::ConflictingGroup(group.name.clone()));
            }
        }
    }

    let scale = config.scale;
    for rule in &config.overrides {
        if rule.target.is_empty() || rule.metadata_attribute.is_empty() || rule.family_marker.is_empty()
        {
            return Err(ValidationError::IncompleteOverride(rule.name.clone()));
        }
        check_flag(scale, &format!("override '{}'", rule.name), rule.minimum_flag)?;
    }

    check_flag(
        scale,
        "masking default threshold",
        config.masking.default_threshold,
    )?;
    for (variable, threshold) in &config.masking.thresholds {
        check_flag(scale, &format!("masking threshold for {variable}"), *threshold)?;
    }

    Ok(())
}

fn check_flag(scale: FlagScale, context: &str, flag: FlagValue) -> ValidationResult {
    if scale.is_valid(flag) {
        Ok(())
    } else {
        Err(ValidationError::FlagOutsideScale {
            context: context.to_string(),
            flag,
            scale,
        })
    }
}

fn validate_group(group: &GroupTestConfig) -> ValidationResult {
    if group.variables.is_empty() {
        return Err(ValidationError::EmptyGroup(group.name.clone()));
    }
    for member in &group.variables {
        for test in &member.tests {
            validate_test(&member.variable, test)?;
        }
    }
    Ok(())
}

fn ordered(lo: f64, hi: f64) -> bool {
    lo.is_finite() && hi.is_finite() && lo <= hi
}

fn validate_test(variable: &str, test: &TestSpec) -> ValidationResult {
    let invalid = || ValidationError::InvalidBounds {
        variable: variable.to_string(),
        test: test.test_name().to_string(),
    };
    match test {
        TestSpec::GrossRange {
            suspect_span,
            fail_span,
        } => {
            if !ordered(suspect_span[0], suspect_span[1]) || !ordered(fail_span[0], fail_span[1]) {
                return Err(invalid());
            }
            if suspect_span[0] < fail_span[0] || suspect_span[1] > fail_span[1] {
                return Err(ValidationError::SuspectOutsideFail {
                    variable: variable.to_string(),
                });
            }
        }
        TestSpec::Spike {
            suspect_threshold,
            fail_threshold,
        } => {
            if *suspect_threshold < 0.0 || !ordered(*suspect_threshold, *fail_threshold) {
                return Err(invalid());
            }
        }
        TestSpec::Location { bbox } => {
            if !ordered(bbox[0], bbox[2]) || !ordered(bbox[1], bbox[3]) {
                return Err(invalid());
            }
        }
        TestSpec::Named { name, .. } => {
            if name.is_empty() {
                return Err(invalid());
            }
        }
    }
    Ok(())
}
