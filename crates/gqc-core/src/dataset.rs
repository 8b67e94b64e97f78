//! In-memory glider dataset: named series on a shared time axis.
//!
//! The dataset owns every value sequence and its attributes. All series,
//! including flag series, have the same length N as the time axis; inserts
//! that would break this are rejected with [`Error::InconsistentLength`].
//!
//! The JSON form is the exchange format at the CLI boundary. Missing values
//! (`NaN`) are written as `null`.

use chrono::{DateTime, TimeZone, Utc};
use gqc_common::{Error, FlagScale, FlagValue, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Sentinel written into masked observations.
pub const MISSING_VALUE: f64 = f64::NAN;

/// Axes every QC run needs.
pub const REQUIRED_VARIABLES: [&str; 2] = ["latitude", "longitude"];

/// A free-form attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Text(String),
    IntList(Vec<i64>),
}

impl AttrValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Text(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Text(s)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

pub type Attributes = BTreeMap<String, AttrValue>;

/// One measured or computed series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    #[serde(with = "nan_as_null")]
    pub values: Vec<f64>,
    #[serde(default)]
    pub attrs: Attributes,
}

impl Variable {
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values,
            attrs: Attributes::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(key.to_string(), value.into());
        self
    }

    pub fn text_attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(AttrValue::as_text)
    }
}

/// Attributes carried by every `<var>_qc` flag variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagAttributes {
    pub long_name: String,
    pub standard_name: String,
    pub quality_control_conventions: String,
    /// 0 = no QC run yet, 1 = QC applied.
    pub quality_control_set: u8,
    pub valid_min: FlagValue,
    pub valid_max: FlagValue,
    pub flag_values: Vec<FlagValue>,
    pub flag_meanings: String,
    pub comment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ioos_qc_module: Option<String>,
}

impl FlagAttributes {
    /// Fresh attributes for the flags of `parent`, before any test ran.
    pub fn for_scale(scale: FlagScale, name: &str, parent: &Variable) -> Self {
        let long_name = parent.text_attr("long_name").unwrap_or(name);
        let standard_name = parent.text_attr("standard_name").unwrap_or(long_name);
        Self {
            long_name: format!("quality control flags for {long_name}"),
            standard_name: format!("{standard_name}_flag"),
            quality_control_conventions: scale.conventions().to_string(),
            quality_control_set: 0,
            valid_min: scale.valid_min(),
            valid_max: scale.valid_max(),
            flag_values: scale.flag_values().to_vec(),
            flag_meanings: scale.flag_meanings().join(", "),
            comment: "No QC applied to this variable".to_string(),
            ioos_qc_module: match scale {
                FlagScale::Qartod => Some("qartod".to_string()),
                FlagScale::Imos => None,
            },
        }
    }
}

/// The flag series attached to one monitored variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagVariable {
    pub flags: Vec<FlagValue>,
    pub attrs: FlagAttributes,
}

impl FlagVariable {
    /// A series of `n` "not evaluated" flags.
    pub fn not_evaluated(scale: FlagScale, name: &str, parent: &Variable) -> Self {
        Self {
            flags: vec![scale.not_evaluated(); parent.values.len()],
            attrs: FlagAttributes::for_scale(scale, name, parent),
        }
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

/// Time-indexed glider dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    time: Vec<DateTime<Utc>>,
    variables: BTreeMap<String, Variable>,
    /// Keyed by parent name; serialized under `<name>_qc`.
    #[serde(default, with = "qc_keys")]
    flags: BTreeMap<String, FlagVariable>,
    #[serde(default)]
    attrs: Attributes,
}

impl Dataset {
    pub fn new(time: Vec<DateTime<Utc>>) -> Self {
        Self {
            time,
            variables: BTreeMap::new(),
            flags: BTreeMap::new(),
            attrs: Attributes::new(),
        }
    }

    /// Builder-style insert of a plain value series.
    pub fn with_variable(mut self, name: &str, values: Vec<f64>) -> Result<Self> {
        self.insert_variable(name, Variable::new(values))?;
        Ok(self)
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.set_attr(key, value);
        self
    }

    /// Parse and validate the JSON exchange form.
    pub fn from_json(json: &str) -> Result<Self> {
        let ds: Dataset = serde_json::from_str(json)?;
        ds.validate()?;
        Ok(ds)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Observation count N.
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn time(&self) -> &[DateTime<Utc>] {
        &self.time
    }

    /// Name of the sibling flag variable in the output container.
    pub fn flag_variable_name(name: &str) -> String {
        format!("{name}_qc")
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    pub fn insert_variable(&mut self, name: &str, variable: Variable) -> Result<()> {
        self.check_len(name, variable.values.len())?;
        self.variables.insert(name.to_string(), variable);
        Ok(())
    }

    pub fn flags(&self, name: &str) -> Option<&FlagVariable> {
        self.flags.get(name)
    }

    pub fn flags_mut(&mut self, name: &str) -> Option<&mut FlagVariable> {
        self.flags.get_mut(name)
    }

    /// Attach or replace the flag series of `name`.
    pub fn insert_flags(&mut self, name: &str, flags: FlagVariable) -> Result<()> {
        self.check_len(&Self::flag_variable_name(name), flags.len())?;
        self.flags.insert(name.to_string(), flags);
        Ok(())
    }

    /// Flag series keyed by parent variable name.
    pub fn flag_variables(&self) -> impl Iterator<Item = (&str, &FlagVariable)> {
        self.flags.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Value sequences and flag series borrowed together, for stages that
    /// rewrite data based on flags.
    pub(crate) fn values_and_flags_mut(
        &mut self,
    ) -> (&mut BTreeMap<String, Variable>, &BTreeMap<String, FlagVariable>) {
        (&mut self.variables, &self.flags)
    }

    pub fn attrs(&self) -> &Attributes {
        &self.attrs
    }

    pub fn attr_text(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(AttrValue::as_text)
    }

    pub fn set_attr(&mut self, key: &str, value: impl Into<AttrValue>) {
        self.attrs.insert(key.to_string(), value.into());
    }

    /// Fail with `MissingRequired` unless every name is a variable.
    pub fn require(&self, names: &[&str]) -> Result<()> {
        match names.iter().find(|n| !self.contains(n)) {
            Some(name) => Err(Error::MissingRequired {
                name: name.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Check the length invariant across every series.
    pub fn validate(&self) -> Result<()> {
        for (name, var) in &self.variables {
            self.check_len(name, var.values.len())?;
        }
        for (name, flags) in &self.flags {
            self.check_len(&Self::flag_variable_name(name), flags.len())?;
        }
        Ok(())
    }

    pub fn mean_latitude(&self) -> Option<f64> {
        self.variable("latitude").and_then(|v| nan_mean(&v.values))
    }

    pub fn mean_longitude(&self) -> Option<f64> {
        self.variable("longitude").and_then(|v| nan_mean(&v.values))
    }

    /// Mean timestamp, to millisecond resolution.
    pub fn mean_time(&self) -> Option<DateTime<Utc>> {
        if self.time.is_empty() {
            return None;
        }
        let sum: i128 = self
            .time
            .iter()
            .map(|t| i128::from(t.timestamp_millis()))
            .sum();
        let mean = sum / self.time.len() as i128;
        Utc.timestamp_millis_opt(i64::try_from(mean).ok()?).single()
    }

    fn check_len(&self, name: &str, actual: usize) -> Result<()> {
        if actual == self.time.len() {
            Ok(())
        } else {
            Err(Error::InconsistentLength {
                variable: name.to_string(),
                expected: self.time.len(),
                actual,
            })
        }
    }
}

fn nan_mean(values: &[f64]) -> Option<f64> {
    let (sum, count) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|v| if v.is_nan() { None } else { Some(*v) }))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let raw: Vec<Option<f64>> = Vec::deserialize(deserializer)?;
        Ok(raw.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }
}

mod qc_keys {
    use super::{Dataset, FlagVariable};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        flags: &BTreeMap<String, FlagVariable>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_map(
            flags
                .iter()
                .map(|(name, series)| (Dataset::flag_variable_name(name), series)),
        )
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, FlagVariable>, D::Error> {
        let raw: BTreeMap<String, FlagVariable> = BTreeMap::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(key, series)| match key.strip_suffix("_qc") {
                Some(parent) => Ok((parent.to_string(), series)),
                None => Err(D::Error::custom(format!(
                    "flag variable {key} lacks the _qc suffix"
                ))),
            })
            .collect()
    }
}
