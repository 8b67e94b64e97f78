//! Battery that replays recorded per-test results.
//!
//! Archived battery output can be fed back through aggregation, overrides
//! and masking without the original QC library installed. Only results
//! for tests the group actually configures are returned, so a recording
//! made with a wider test set replays cleanly against a narrower config.
//!
//! ```json
//! {
//!   "battery": "ioos_qc",
//!   "version": "2.1.0",
//!   "results": {
//!     "TEMP": [{"test": "gross_range_test", "flags": [1, 1, 3]}]
//!   }
//! }
//! ```

use gqc_config::GroupTestConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::{BatteryError, DataSlice, TestBattery, TestOutcome};
use gqc_common::FlagValue;

/// One recorded test series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedTest {
    pub test: String,
    pub flags: Vec<FlagValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayBattery {
    pub battery: String,
    pub version: String,
    /// Recorded series keyed by battery-facing variable name.
    #[serde(default)]
    pub results: BTreeMap<String, Vec<RecordedTest>>,
}

impl ReplayBattery {
    pub fn new(battery: &str, version: &str) -> Self {
        Self {
            battery: battery.to_string(),
            version: version.to_string(),
            results: BTreeMap::new(),
        }
    }

    /// Record one test series for `variable` (battery-facing name).
    pub fn with_result(mut self, variable: &str, test: &str, flags: Vec<FlagValue>) -> Self {
        self.results
            .entry(variable.to_string())
            .or_default()
            .push(RecordedTest {
                test: test.to_string(),
                flags,
            });
        self
    }

    pub fn from_json(json: &str) -> Result<Self, BatteryError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, BatteryError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

impl TestBattery for ReplayBattery {
    fn name(&self) -> &str {
        &self.battery
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn run_tests(
        &self,
        _slice: &DataSlice<'_>,
        config: &GroupTestConfig,
    ) -> Result<Vec<TestOutcome>, BatteryError> {
        let mut outcomes = Vec::new();
        for member in &config.variables {
            let Some(recorded) = self.results.get(&member.variable) else {
                continue;
            };
            for entry in recorded {
                if member.tests.iter().any(|t| t.test_name() == entry.test) {
                    outcomes.push(TestOutcome {
                        test: entry.test.clone(),
                        variable: member.variable.clone(),
                        flags: entry.flags.clone(),
                    });
                }
            }
        }
        Ok(outcomes)
    }
}
