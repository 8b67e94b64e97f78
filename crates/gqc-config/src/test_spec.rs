//! Test specifications handed to the external test battery.
//!
//! These types only describe which tests to run and with which thresholds;
//! the tests themselves live in the battery. Their `Display` output is the
//! provenance text recorded in flag comments.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One configured QC test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "test", rename_all = "snake_case")]
pub enum TestSpec {
    /// Values outside `fail_span` fail, outside `suspect_span` are suspect.
    GrossRange {
        suspect_span: [f64; 2],
        fail_span: [f64; 2],
    },
    /// Spike magnitude thresholds.
    Spike {
        suspect_threshold: f64,
        fail_threshold: f64,
    },
    /// Geographic bounds `[lon_min, lat_min, lon_max, lat_max]`.
    Location { bbox: [f64; 4] },
    /// Battery-native configuration passed through verbatim.
    Named {
        name: String,
        #[serde(default)]
        params: serde_json::Value,
    },
}

impl TestSpec {
    /// Battery-facing test name.
    pub fn test_name(&self) -> &str {
        match self {
            TestSpec::GrossRange { .. } => "gross_range_test",
            TestSpec::Spike { .. } => "spike_test",
            TestSpec::Location { .. } => "location_test",
            TestSpec::Named { name, .. } => name,
        }
    }
}

impl fmt::Display for TestSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestSpec::GrossRange {
                suspect_span,
                fail_span,
            } => write!(
                f,
                "gross_range_test(suspect_span=[{}, {}], fail_span=[{}, {}])",
                suspect_span[0], suspect_span[1], fail_span[0], fail_span[1]
            ),
            TestSpec::Spike {
                suspect_threshold,
                fail_threshold,
            } => write!(
                f,
                "spike_test(suspect_threshold={}, fail_threshold={})",
                suspect_threshold, fail_threshold
            ),
            TestSpec::Location { bbox } => write!(
                f,
                "location_test(bbox=[{}, {}, {}, {}])",
                bbox[0], bbox[1], bbox[2], bbox[3]
            ),
            TestSpec::Named { name, params } => {
                if params.is_null() {
                    write!(f, "{}", name)
                } else {
                    write!(f, "{}({})", name, params)
                }
            }
        }
    }
}

/// Tests configured for a single variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableTests {
    pub variable: String,
    pub tests: Vec<TestSpec>,
}

impl fmt::Display for VariableTests {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.variable)?;
        for (i, test) in self.tests.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", test)?;
        }
        Ok(())
    }
}

/// One named configuration shared by a group of variables.
///
/// A single-variable group is the usual case; multi-variable groups run the
/// members together (e.g. temperature + salinity for density products) and
/// roll their results into one flag per observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupTestConfig {
    pub name: String,
    pub variables: Vec<VariableTests>,
    /// Literature or threshold citation appended to flag comments.
    #[serde(default)]
    pub citation: Option<String>,
}

impl GroupTestConfig {
    pub fn single(name: &str, variable: &str, tests: Vec<TestSpec>) -> Self {
        Self {
            name: name.to_string(),
            variables: vec![VariableTests {
                variable: variable.to_string(),
                tests,
            }],
            citation: None,
        }
    }

    pub fn with_citation(mut self, citation: &str) -> Self {
        self.citation = Some(citation.to_string());
        self
    }

    /// Concatenate several groups into one, keeping member order.
    pub fn combine(name: &str, groups: &[&GroupTestConfig]) -> Self {
        Self {
            name: name.to_string(),
            variables: groups
                .iter()
                .flat_map(|g| g.variables.iter().cloned())
                .collect(),
            citation: groups.iter().find_map(|g| g.citation.clone()),
        }
    }

    /// Names of every variable the group needs.
    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variables.iter().map(|v| v.variable.as_str())
    }

    /// Total number of configured tests across members.
    pub fn test_count(&self) -> usize {
        self.variables.iter().map(|v| v.tests.len()).sum()
    }
}

impl fmt::Display for GroupTestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {{", self.name)?;
        for (i, member) in self.variables.iter().enumerate() {
            if i > 0 {
                write!(f, ";")?;
            }
            write!(f, " {}", member)?;
        }
        write!(f, " }}")
    }
}
