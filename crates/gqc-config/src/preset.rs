//! Versioned configuration presets.
//!
//! Each preset pins a flag scale, a battery description, and the threshold
//! tables for every monitored variable. Revising thresholds means adding a
//! new preset version, never editing an existing one, so flagged datasets
//! stay reproducible from the `qc_preset` attribute they carry.

use chrono::NaiveDate;
use gqc_common::FlagScale;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::qc_config::{MaskingConfig, OverrideRuleConfig, QcConfig};
use crate::test_spec::{GroupTestConfig, TestSpec};
use crate::CONFIG_SCHEMA_VERSION;

const EUROGOOS_CITATION: &str = "Threshold values from EuroGOOS DATA-MEQ Working Group (2010) \
Recommendations for in-situ data Near Real Time Quality Control [Version 1.2]. EuroGOOS, 23pp. \
DOI http://dx.doi.org/10.25607/OBP-214";

const QARTOD_LABEL: &str = "IOOS QC QARTOD https://github.com/ioos/ioos_qc";

const COTEDE_LABEL: &str = "CoTeDe: Castelão, G. P., (2020). A Framework to Quality Control \
Oceanographic Data. Journal of Open Source Software, 5(48), 2063, https://doi.org/10.21105/joss.02063";

const PROCESSING_LEVEL: &str = "L1. Quality control flags";

const DISCLAIMER: &str = "Data, products and services from VOTO are provided 'as is' without any \
warranty as to fitness for a particular purpose.";

const CODA_COMMENT: &str =
    "Oxygen optode improperly calibrated during this deployment. Data may be recoverable.";

/// Baltic / North Sea operating box: `[lon_min, lat_min, lon_max, lat_max]`.
const OPERATING_BBOX: [f64; 4] = [10.0, 50.0, 25.0, 60.0];

/// Derived variables that receive the temperature + salinity group test.
const DENSITY_PRODUCTS: [&str; 3] = ["potential_density", "density", "potential_temperature"];

#[derive(Debug, Error)]
pub enum PresetError {
    #[error("unknown preset '{0}' (available: ioos-qartod-v1, cotede-eurogoos-v1)")]
    Unknown(String),
}

impl From<PresetError> for gqc_common::Error {
    fn from(e: PresetError) -> Self {
        gqc_common::Error::InvalidPreset(e.to_string())
    }
}

/// Available presets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PresetName {
    /// IOOS QARTOD tests with EuroGOOS thresholds, QARTOD flag scale.
    #[default]
    #[serde(rename = "ioos-qartod-v1")]
    IoosQartodV1,
    /// CoTeDe EuroGOOS profile, IMOS flag scale.
    #[serde(rename = "cotede-eurogoos-v1")]
    CotedeEurogoosV1,
}

impl PresetName {
    pub const ALL: [PresetName; 2] = [PresetName::IoosQartodV1, PresetName::CotedeEurogoosV1];

    pub fn as_str(self) -> &'static str {
        match self {
            PresetName::IoosQartodV1 => "ioos-qartod-v1",
            PresetName::CotedeEurogoosV1 => "cotede-eurogoos-v1",
        }
    }
}

impl fmt::Display for PresetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PresetName {
    type Err = PresetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PresetName::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| PresetError::Unknown(s.to_string()))
    }
}

/// Summary row for `gqc presets`.
#[derive(Debug, Clone, Serialize)]
pub struct PresetInfo {
    pub name: PresetName,
    pub scale: FlagScale,
    pub description: &'static str,
}

/// List all presets with a short description.
pub fn list_presets() -> Vec<PresetInfo> {
    PresetName::ALL
        .into_iter()
        .map(|name| PresetInfo {
            name,
            scale: get_preset(name).scale,
            description: match name {
                PresetName::IoosQartodV1 => {
                    "IOOS QARTOD gross range, spike and location tests with EuroGOOS thresholds"
                }
                PresetName::CotedeEurogoosV1 => {
                    "CoTeDe EuroGOOS profile for temperature and salinity on IMOS flags"
                }
            },
        })
        .collect()
}

/// Build the configuration for a preset.
pub fn get_preset(name: PresetName) -> QcConfig {
    match name {
        PresetName::IoosQartodV1 => ioos_qartod_v1(),
        PresetName::CotedeEurogoosV1 => cotede_eurogoos_v1(),
    }
}

fn qartod_tests(
    suspect_span: [f64; 2],
    fail_span: [f64; 2],
    suspect_threshold: f64,
    fail_threshold: f64,
) -> Vec<TestSpec> {
    vec![
        TestSpec::GrossRange {
            suspect_span,
            fail_span,
        },
        TestSpec::Spike {
            suspect_threshold,
            fail_threshold,
        },
        TestSpec::Location {
            bbox: OPERATING_BBOX,
        },
    ]
}

fn coda_override() -> OverrideRuleConfig {
    OverrideRuleConfig {
        name: "coda_optode_early_calibration".to_string(),
        target: "oxygen_concentration".to_string(),
        metadata_attribute: "oxygen".to_string(),
        family_field: "make_model".to_string(),
        family_marker: "coda".to_string(),
        calibration_field: "calibration_date".to_string(),
        // Batches calibrated before this date were miscalibrated at the factory.
        calibrated_before: NaiveDate::from_ymd_opt(2022, 6, 30).expect("constant date is valid"),
        minimum_flag: 3,
        comment: CODA_COMMENT.to_string(),
    }
}

fn ioos_qartod_v1() -> QcConfig {
    let temperature = GroupTestConfig::single(
        "temperature",
        "temperature",
        qartod_tests([0.0, 30.0], [-2.5, 40.0], 2.0, 6.0),
    )
    .with_citation(EUROGOOS_CITATION);
    let salinity = GroupTestConfig::single(
        "salinity",
        "salinity",
        qartod_tests([5.0, 30.0], [2.0, 41.0], 0.3, 0.9),
    )
    .with_citation(EUROGOOS_CITATION);
    let oxygen = GroupTestConfig::single(
        "oxygen_concentration",
        "oxygen_concentration",
        qartod_tests([0.0, 350.0], [0.0, 500.0], 10.0, 50.0),
    );
    let chlorophyll = GroupTestConfig::single(
        "chlorophyll",
        "chlorophyll",
        qartod_tests([-1.0, 10.0], [-1.0, 15.0], 1.0, 5.0),
    );

    let tempsal = GroupTestConfig::combine("temperature_salinity", &[&temperature, &salinity]);
    let group_tests: BTreeMap<String, GroupTestConfig> = DENSITY_PRODUCTS
        .iter()
        .map(|name| (name.to_string(), tempsal.clone()))
        .collect();

    let mut variable_tests = BTreeMap::new();
    for group in [temperature, salinity, oxygen, chlorophyll] {
        variable_tests.insert(group.name.clone(), group);
    }

    QcConfig {
        schema_version: CONFIG_SCHEMA_VERSION.to_string(),
        preset: PresetName::IoosQartodV1.to_string(),
        scale: FlagScale::Qartod,
        battery_label: QARTOD_LABEL.to_string(),
        variable_tests,
        group_tests,
        overrides: vec![coda_override()],
        masking: MaskingConfig::default(),
        processing_level: PROCESSING_LEVEL.to_string(),
        disclaimer: DISCLAIMER.to_string(),
    }
}

fn cotede_eurogoos_v1() -> QcConfig {
    let eurogoos = || TestSpec::Named {
        name: "eurogoos".to_string(),
        params: serde_json::Value::Null,
    };
    let mut variable_tests = BTreeMap::new();
    for variable in ["temperature", "salinity"] {
        variable_tests.insert(
            variable.to_string(),
            GroupTestConfig::single(variable, variable, vec![eurogoos()])
                .with_citation(EUROGOOS_CITATION),
        );
    }

    QcConfig {
        schema_version: CONFIG_SCHEMA_VERSION.to_string(),
        preset: PresetName::CotedeEurogoosV1.to_string(),
        scale: FlagScale::Imos,
        battery_label: COTEDE_LABEL.to_string(),
        variable_tests,
        group_tests: BTreeMap::new(),
        overrides: vec![coda_override()],
        masking: MaskingConfig::default(),
        processing_level: PROCESSING_LEVEL.to_string(),
        disclaimer: DISCLAIMER.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::validate_config;

    #[test]
    fn all_presets_validate() {
        for name in PresetName::ALL {
            let config = get_preset(name);
            assert!(validate_config(&config).is_ok(), "{name} failed validation");
            assert_eq!(config.preset, name.as_str());
        }
    }

    #[test]
    fn preset_name_roundtrip() {
        for name in PresetName::ALL {
            assert_eq!(name.as_str().parse::<PresetName>().unwrap(), name);
            let json = serde_json::to_string(&name).unwrap();
            assert_eq!(json, format!("\"{}\"", name.as_str()));
        }
        assert!("qartod".parse::<PresetName>().is_err());
    }

    #[test]
    fn qartod_density_products_use_both_inputs() {
        let config = get_preset(PresetName::IoosQartodV1);
        for name in DENSITY_PRODUCTS {
            let group = config.group_test_for(name).unwrap();
            let members: Vec<&str> = group.variable_names().collect();
            assert_eq!(members, vec!["temperature", "salinity"]);
        }
        assert!(config.group_test_for("conductivity").is_none());
    }

    #[test]
    fn qartod_thresholds() {
        let config = get_preset(PresetName::IoosQartodV1);
        let temp = config.tests_for("temperature").unwrap();
        assert_eq!(
            temp.variables[0].tests[0],
            TestSpec::GrossRange {
                suspect_span: [0.0, 30.0],
                fail_span: [-2.5, 40.0]
            }
        );
        assert!(config.tests_for("chlorophyll").unwrap().citation.is_none());
        assert_eq!(config.scale, FlagScale::Qartod);
    }

    #[test]
    fn cotede_uses_imos_scale_and_skips_oxygen() {
        let config = get_preset(PresetName::CotedeEurogoosV1);
        assert_eq!(config.scale, FlagScale::Imos);
        assert!(config.tests_for("oxygen_concentration").is_none());
        assert_eq!(config.overrides.len(), 1);
    }

    #[test]
    fn list_presets_covers_all() {
        let infos = list_presets();
        assert_eq!(infos.len(), PresetName::ALL.len());
        assert_eq!(infos[1].scale, FlagScale::Imos);
    }
}
