//! Test battery seam and the adapter that rolls its results into flags.
//!
//! A [`TestBattery`] is an external collaborator that runs the statistical
//! QC tests (gross range, spike, location, ...) and returns one ordinal
//! result per test per observation. [`TestRunner`] is the only caller: it
//! builds the battery's view of the dataset, checks every returned series,
//! and merges the per-test results into one flag per observation with
//! [`worse`](gqc_common::worse).
//!
//! Two batteries ship with the crate:
//! - [`SubprocessBattery`]: JSON over stdin/stdout to an external program.
//! - [`ReplayBattery`]: replays per-test flags recorded earlier.

pub mod replay;
pub mod subprocess;

pub use replay::ReplayBattery;
pub use subprocess::SubprocessBattery;

use chrono::{DateTime, Utc};
use gqc_common::{merge_into, Error, FlagScale, FlagValue, Result};
use gqc_config::{GroupTestConfig, VariableTests};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::dataset::Dataset;
use crate::registry::VariableRegistry;

/// Errors raised by a battery implementation.
#[derive(Debug, thiserror::Error)]
pub enum BatteryError {
    #[error("battery returned invalid JSON: {0}")]
    InvalidOutput(#[from] serde_json::Error),

    #[error("battery execution failed: {0}")]
    ExecutionFailed(String),

    #[error("battery output exceeded {limit} bytes")]
    OutputTooLarge { limit: usize },

    #[error("battery I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The battery's read-only view of one variable group.
///
/// Variable keys are the battery-facing aliases.
#[derive(Debug, Serialize)]
pub struct DataSlice<'a> {
    pub time: &'a [DateTime<Utc>],
    pub latitude: &'a [f64],
    pub longitude: &'a [f64],
    pub variables: BTreeMap<String, &'a [f64]>,
    pub mean_latitude: Option<f64>,
    pub mean_longitude: Option<f64>,
    pub mean_time: Option<DateTime<Utc>>,
}

impl DataSlice<'_> {
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
}

/// One test's result series for one variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub test: String,
    pub variable: String,
    pub flags: Vec<FlagValue>,
}

/// An external QC test battery.
pub trait TestBattery: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Run every test in `config` against `slice`. Variable names in
    /// `config` are already resolved to the battery's aliases.
    fn run_tests(
        &self,
        slice: &DataSlice<'_>,
        config: &GroupTestConfig,
    ) -> std::result::Result<Vec<TestOutcome>, BatteryError>;
}

/// Which battery ran which configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Provenance {
    pub battery: String,
    pub version: String,
    pub config: String,
    pub citation: Option<String>,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.battery, self.version, self.config)
    }
}

/// Result of running one group through the battery.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Merged flags, one per observation.
    Flagged {
        flags: Vec<FlagValue>,
        provenance: Provenance,
    },
    /// One or more group variables are not in the dataset.
    Absent { missing: Vec<String> },
    /// The battery returned no result for these group variables.
    Untested { variables: Vec<String> },
}

/// Adapter between the aggregator and a [`TestBattery`].
pub struct TestRunner<'a> {
    battery: &'a dyn TestBattery,
    registry: &'a VariableRegistry,
    scale: FlagScale,
}

impl<'a> TestRunner<'a> {
    pub fn new(battery: &'a dyn TestBattery, registry: &'a VariableRegistry, scale: FlagScale) -> Self {
        Self {
            battery,
            registry,
            scale,
        }
    }

    /// Run `config` against `ds` and merge the per-test results.
    pub fn run(&self, ds: &Dataset, config: &GroupTestConfig) -> Result<RunOutcome> {
        let missing: Vec<String> = config
            .variable_names()
            .filter(|name| !ds.contains(name))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            debug!(group = %config.name, ?missing, "group variables absent");
            return Ok(RunOutcome::Absent { missing });
        }

        let slice = self.slice(ds, config)?;
        let external = self.external_config(config);
        let outcomes = self
            .battery
            .run_tests(&slice, &external)
            .map_err(|e| Error::Battery {
                battery: self.battery.name().to_string(),
                message: e.to_string(),
            })?;

        let flags = self.roll_up(ds.len(), &outcomes)?;
        let untested: Vec<String> = config
            .variable_names()
            .filter(|name| {
                let key = self.registry.resolve_alias(name);
                !outcomes.iter().any(|o| o.variable == key)
            })
            .map(str::to_string)
            .collect();
        if !untested.is_empty() {
            debug!(group = %config.name, ?untested, "battery returned no results");
            return Ok(RunOutcome::Untested { variables: untested });
        }
        debug!(
            group = %config.name,
            tests = outcomes.len(),
            "battery results merged"
        );

        Ok(RunOutcome::Flagged {
            flags,
            provenance: Provenance {
                battery: self.battery.name().to_string(),
                version: self.battery.version().to_string(),
                config: config.to_string(),
                citation: config.citation.clone(),
            },
        })
    }

    fn slice<'d>(&self, ds: &'d Dataset, config: &GroupTestConfig) -> Result<DataSlice<'d>> {
        let series = move |name: &str| -> Result<&'d [f64]> {
            ds.variable(name)
                .map(|v| v.values.as_slice())
                .ok_or_else(|| Error::MissingRequired {
                    name: name.to_string(),
                })
        };

        let mut variables = BTreeMap::new();
        for name in config.variable_names() {
            variables.insert(self.registry.resolve_alias(name).to_string(), series(name)?);
        }
        // Auxiliary axes some tests use when the dataset has them.
        for name in ["pressure", "depth"] {
            if let Some(var) = ds.variable(name) {
                variables
                    .entry(self.registry.resolve_alias(name).to_string())
                    .or_insert(var.values.as_slice());
            }
        }

        Ok(DataSlice {
            time: ds.time(),
            latitude: series("latitude")?,
            longitude: series("longitude")?,
            variables,
            mean_latitude: ds.mean_latitude(),
            mean_longitude: ds.mean_longitude(),
            mean_time: ds.mean_time(),
        })
    }

    fn external_config(&self, config: &GroupTestConfig) -> GroupTestConfig {
        GroupTestConfig {
            name: config.name.clone(),
            variables: config
                .variables
                .iter()
                .map(|member| VariableTests {
                    variable: self.registry.resolve_alias(&member.variable).to_string(),
                    tests: member.tests.clone(),
                })
                .collect(),
            citation: config.citation.clone(),
        }
    }

    /// Worst flag per observation across every test.
    fn roll_up(&self, n: usize, outcomes: &[TestOutcome]) -> Result<Vec<FlagValue>> {
        let mut merged: Option<Vec<FlagValue>> = None;
        for outcome in outcomes {
            let label = format!("{}/{}", outcome.variable, outcome.test);
            if outcome.flags.len() != n {
                return Err(Error::InconsistentLength {
                    variable: label,
                    expected: n,
                    actual: outcome.flags.len(),
                });
            }
            if let Some(bad) = outcome.flags.iter().find(|f| !self.scale.is_valid(**f)) {
                return Err(Error::FlagOutOfRange {
                    variable: label,
                    flag: *bad,
                    scale: self.scale.to_string(),
                });
            }
            match merged.as_mut() {
                Some(acc) => merge_into(acc, &outcome.flags),
                None => merged = Some(outcome.flags.clone()),
            }
        }
        Ok(merged.unwrap_or_else(|| vec![self.scale.not_evaluated(); n]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use gqc_config::TestSpec;

    struct FixedBattery {
        results: Vec<TestOutcome>,
    }

    impl TestBattery for FixedBattery {
        fn name(&self) -> &str {
            "fixed"
        }

        fn version(&self) -> &str {
            "0.0.1"
        }

        fn run_tests(
            &self,
            slice: &DataSlice<'_>,
            config: &GroupTestConfig,
        ) -> std::result::Result<Vec<TestOutcome>, BatteryError> {
            assert!(slice.variables.contains_key("TEMP"));
            assert_eq!(config.variables[0].variable, "TEMP");
            Ok(self.results.clone())
        }
    }

    fn dataset(n: usize) -> Dataset {
        let time = (0..n)
            .map(|i| Utc.timestamp_opt(1_650_000_000 + i as i64, 0).unwrap())
            .collect();
        Dataset::new(time)
            .with_variable("latitude", vec![57.0; n])
            .unwrap()
            .with_variable("longitude", vec![11.0; n])
            .unwrap()
            .with_variable("temperature", vec![10.0; n])
            .unwrap()
    }

    fn temperature_config() -> GroupTestConfig {
        GroupTestConfig::single(
            "temperature",
            "temperature",
            vec![TestSpec::Spike {
                suspect_threshold: 2.0,
                fail_threshold: 6.0,
            }],
        )
    }

    fn outcome(test: &str, flags: Vec<FlagValue>) -> TestOutcome {
        TestOutcome {
            test: test.into(),
            variable: "TEMP".into(),
            flags,
        }
    }

    #[test]
    fn rollup_takes_worst_per_observation() {
        let battery = FixedBattery {
            results: vec![
                outcome("gross_range_test", vec![1, 1, 3, 1]),
                outcome("spike_test", vec![1, 4, 1, 1]),
                outcome("location_test", vec![1, 1, 1, 1]),
            ],
        };
        let registry = VariableRegistry::glider();
        let runner = TestRunner::new(&battery, &registry, FlagScale::Qartod);
        match runner.run(&dataset(4), &temperature_config()).unwrap() {
            RunOutcome::Flagged { flags, provenance } => {
                assert_eq!(flags, vec![1, 4, 3, 1]);
                assert_eq!(provenance.battery, "fixed");
                assert!(provenance.to_string().starts_with("fixed 0.0.1: temperature {"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rollup_is_order_independent() {
        let a = outcome("a", vec![1, 3, 1]);
        let b = outcome("b", vec![4, 1, 1]);
        let registry = VariableRegistry::glider();
        let forward = FixedBattery {
            results: vec![a.clone(), b.clone()],
        };
        let backward = FixedBattery {
            results: vec![b, a],
        };
        let ds = dataset(3);
        let run = |battery: &FixedBattery| {
            TestRunner::new(battery, &registry, FlagScale::Qartod)
                .run(&ds, &temperature_config())
                .unwrap()
        };
        match (run(&forward), run(&backward)) {
            (RunOutcome::Flagged { flags: f1, .. }, RunOutcome::Flagged { flags: f2, .. }) => {
                assert_eq!(f1, f2);
                assert_eq!(f1, vec![4, 3, 1]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn absent_variable_is_not_an_error() {
        let battery = FixedBattery { results: vec![] };
        let registry = VariableRegistry::glider();
        let runner = TestRunner::new(&battery, &registry, FlagScale::Qartod);
        let config = GroupTestConfig::single("salinity", "salinity", vec![]);
        assert_eq!(
            runner.run(&dataset(2), &config).unwrap(),
            RunOutcome::Absent {
                missing: vec!["salinity".into()]
            }
        );
    }

    #[test]
    fn no_results_mark_group_untested() {
        let battery = FixedBattery { results: vec![] };
        let registry = VariableRegistry::glider();
        let runner = TestRunner::new(&battery, &registry, FlagScale::Imos);
        assert_eq!(
            runner.run(&dataset(2), &temperature_config()).unwrap(),
            RunOutcome::Untested {
                variables: vec!["temperature".into()]
            }
        );
    }

    #[test]
    fn results_for_another_variable_do_not_count() {
        let battery = FixedBattery {
            results: vec![TestOutcome {
                test: "spike_test".into(),
                variable: "PSAL".into(),
                flags: vec![1, 1],
            }],
        };
        let registry = VariableRegistry::glider();
        let runner = TestRunner::new(&battery, &registry, FlagScale::Qartod);
        assert!(matches!(
            runner.run(&dataset(2), &temperature_config()).unwrap(),
            RunOutcome::Untested { .. }
        ));
    }

    #[test]
    fn short_result_series_is_fatal() {
        let battery = FixedBattery {
            results: vec![outcome("spike_test", vec![1, 1])],
        };
        let registry = VariableRegistry::glider();
        let runner = TestRunner::new(&battery, &registry, FlagScale::Qartod);
        assert!(matches!(
            runner.run(&dataset(3), &temperature_config()),
            Err(Error::InconsistentLength { .. })
        ));
    }

    #[test]
    fn out_of_scale_flag_is_fatal() {
        let battery = FixedBattery {
            results: vec![outcome("spike_test", vec![1, 5])],
        };
        let registry = VariableRegistry::glider();
        let runner = TestRunner::new(&battery, &registry, FlagScale::Qartod);
        assert!(matches!(
            runner.run(&dataset(2), &temperature_config()),
            Err(Error::FlagOutOfRange { flag: 5, .. })
        ));
    }
}
