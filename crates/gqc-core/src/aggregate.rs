//! Flag aggregation: one flag series per monitored variable.
//!
//! Stages, in order:
//! 1. Every registry variable present in the dataset gets a fresh series of
//!    "not evaluated" flags with the scale's attributes.
//! 2. Configured primaries, and any dedicated group tests for derived
//!    variables, go through the [`TestRunner`]. The calls fan out on the
//!    rayon pool; results are collected in job order so output never
//!    depends on completion order.
//! 3. Derived variables take the worst flag of their dependencies, and
//!    additionally of their group test when one ran.
//!
//! Absent variables and missing dependencies are not errors, nor is a group
//! the battery returned nothing for. They leave the affected series "not
//! evaluated" and show up as skips in the report.

use gqc_common::{merge_into, Error, FlagScale, FlagValue, Result};
use gqc_config::{GroupTestConfig, QcConfig};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info, warn};

use crate::battery::{Provenance, RunOutcome, TestBattery, TestRunner};
use crate::dataset::{Dataset, FlagVariable};
use crate::diagnostics::FlagSummary;
use crate::registry::{Role, VariableRegistry};

/// Why a variable kept its "not evaluated" flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Not a variable of this dataset.
    Absent,
    /// Present, but the config has no tests for it.
    NotConfigured,
    /// A dependency was absent or untested.
    MissingDependency { dependency: String },
    /// The dataset has no observations.
    EmptySeries,
    /// Configured, but the battery returned no result for it.
    NoResults,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Absent => write!(f, "not in dataset"),
            SkipReason::NotConfigured => write!(f, "no tests configured"),
            SkipReason::MissingDependency { dependency } => {
                write!(f, "dependency {dependency} not evaluated")
            }
            SkipReason::EmptySeries => write!(f, "no observations"),
            SkipReason::NoResults => write!(f, "battery returned no results"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VariableOutcome {
    /// Primary variable flagged by the battery.
    Tested {
        provenance: Provenance,
        summary: FlagSummary,
    },
    /// Derived variable flagged by propagation alone.
    Derived {
        from: Vec<String>,
        summary: FlagSummary,
    },
    /// Derived variable with a dedicated group test on top of propagation.
    GroupTested {
        from: Vec<String>,
        provenance: Provenance,
        summary: FlagSummary,
    },
    Skipped {
        #[serde(flatten)]
        reason: SkipReason,
        /// Present for empty series, whose diagnostics are still reported.
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<FlagSummary>,
    },
}

impl VariableOutcome {
    pub fn skipped(reason: SkipReason) -> Self {
        VariableOutcome::Skipped {
            reason,
            summary: None,
        }
    }

    pub fn summary(&self) -> Option<&FlagSummary> {
        match self {
            VariableOutcome::Tested { summary, .. }
            | VariableOutcome::Derived { summary, .. }
            | VariableOutcome::GroupTested { summary, .. } => Some(summary),
            VariableOutcome::Skipped { summary, .. } => summary.as_ref(),
        }
    }

    pub fn is_evaluated(&self) -> bool {
        !matches!(self, VariableOutcome::Skipped { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableReport {
    pub variable: String,
    pub role: Role,
    #[serde(flatten)]
    pub outcome: VariableOutcome,
}

/// Per-variable results of one aggregation, in monitoring order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationReport {
    pub scale: FlagScale,
    pub observations: usize,
    pub variables: Vec<VariableReport>,
}

impl AggregationReport {
    pub fn get(&self, variable: &str) -> Option<&VariableOutcome> {
        self.variables
            .iter()
            .find(|r| r.variable == variable)
            .map(|r| &r.outcome)
    }

    pub fn evaluated_count(&self) -> usize {
        self.variables
            .iter()
            .filter(|r| r.outcome.is_evaluated())
            .count()
    }

    pub fn skipped(&self) -> impl Iterator<Item = (&str, &SkipReason)> {
        self.variables.iter().filter_map(|r| match &r.outcome {
            VariableOutcome::Skipped { reason, .. } => Some((r.variable.as_str(), reason)),
            _ => None,
        })
    }
}

/// Battery call scheduled during the fan-out.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Job {
    Primary(String),
    Group(String),
}

pub struct FlagAggregator<'a> {
    config: &'a QcConfig,
    registry: &'a VariableRegistry,
    battery: &'a dyn TestBattery,
}

impl<'a> FlagAggregator<'a> {
    pub fn new(
        config: &'a QcConfig,
        registry: &'a VariableRegistry,
        battery: &'a dyn TestBattery,
    ) -> Self {
        Self {
            config,
            registry,
            battery,
        }
    }

    /// Attach a flag series to every monitored variable present in `ds`.
    pub fn aggregate(&self, ds: &mut Dataset) -> Result<AggregationReport> {
        let scale = self.config.scale;
        let mut outcomes: BTreeMap<String, VariableOutcome> = BTreeMap::new();

        for descriptor in self.registry.descriptors() {
            let name = descriptor.name.as_str();
            match ds.variable(name) {
                Some(parent) => {
                    let flags = FlagVariable::not_evaluated(scale, name, parent);
                    ds.insert_flags(name, flags)?;
                }
                None => {
                    info!(variable = name, "not in dataset, skipping");
                    outcomes.insert(
                        name.to_string(),
                        VariableOutcome::skipped(SkipReason::Absent),
                    );
                }
            }
        }

        if ds.is_empty() {
            for descriptor in self.registry.descriptors() {
                outcomes
                    .entry(descriptor.name.clone())
                    .or_insert_with(|| {
                        let err = Error::EmptySeries {
                            variable: descriptor.name.clone(),
                        };
                        info!("{err}");
                        VariableOutcome::Skipped {
                            reason: SkipReason::EmptySeries,
                            summary: Some(FlagSummary::of(&[], scale)),
                        }
                    });
            }
            return Ok(self.report(ds, outcomes));
        }

        let results = self.run_battery(ds)?;

        for descriptor in self.registry.primaries() {
            let name = descriptor.name.as_str();
            if outcomes.contains_key(name) {
                continue;
            }
            let outcome = match results.get(&Job::Primary(name.to_string())) {
                Some(RunOutcome::Flagged { flags, provenance }) => {
                    let comment = self.provenance_comment(provenance);
                    self.store(ds, name, flags.clone(), comment)?;
                    VariableOutcome::Tested {
                        provenance: provenance.clone(),
                        summary: FlagSummary::of(flags, scale),
                    }
                }
                Some(RunOutcome::Absent { missing }) => {
                    info!(variable = name, ?missing, "test group incomplete, skipping");
                    VariableOutcome::skipped(SkipReason::Absent)
                }
                Some(RunOutcome::Untested { variables }) => {
                    warn!(
                        variable = name,
                        ?variables,
                        "battery returned no results, leaving flags not evaluated"
                    );
                    VariableOutcome::skipped(SkipReason::NoResults)
                }
                None => {
                    debug!(variable = name, "no tests configured");
                    VariableOutcome::skipped(SkipReason::NotConfigured)
                }
            };
            outcomes.insert(name.to_string(), outcome);
        }

        for descriptor in self.registry.derived() {
            let name = descriptor.name.as_str();
            if outcomes.contains_key(name) {
                continue;
            }
            let unevaluated = descriptor
                .depends_on
                .iter()
                .find(|dep| !outcomes.get(*dep).is_some_and(VariableOutcome::is_evaluated));
            if let Some(dependency) = unevaluated {
                let err = Error::MissingDependency {
                    variable: name.to_string(),
                    dependency: dependency.clone(),
                };
                info!("{err}, leaving flags not evaluated");
                outcomes.insert(
                    name.to_string(),
                    VariableOutcome::skipped(SkipReason::MissingDependency {
                        dependency: dependency.clone(),
                    }),
                );
                continue;
            }

            let mut propagated = self.worst_of_dependencies(ds, &descriptor.depends_on)?;
            let group = self
                .config
                .group_test_for(name)
                .and_then(|g| results.get(&Job::Group(g.name.clone())));
            if let Some(RunOutcome::Untested { variables }) = group {
                warn!(
                    variable = name,
                    ?variables,
                    "group test returned no results, using propagated flags"
                );
            }
            let outcome = match group {
                Some(RunOutcome::Flagged { flags, provenance }) => {
                    merge_into(&mut propagated, flags);
                    let comment = self.provenance_comment(provenance);
                    let summary = FlagSummary::of(&propagated, scale);
                    self.store(ds, name, propagated, comment)?;
                    VariableOutcome::GroupTested {
                        from: descriptor.depends_on.clone(),
                        provenance: provenance.clone(),
                        summary,
                    }
                }
                _ => {
                    let comment = format!(
                        "Derived as the worst flag of {}",
                        descriptor.depends_on.join(", ")
                    );
                    let summary = FlagSummary::of(&propagated, scale);
                    self.store(ds, name, propagated, comment)?;
                    VariableOutcome::Derived {
                        from: descriptor.depends_on.clone(),
                        summary,
                    }
                }
            };
            outcomes.insert(name.to_string(), outcome);
        }

        Ok(self.report(ds, outcomes))
    }

    /// Run every primary test group and every distinct derived group test.
    fn run_battery(&self, ds: &Dataset) -> Result<BTreeMap<Job, RunOutcome>> {
        let mut jobs: Vec<(Job, &GroupTestConfig)> = Vec::new();
        for descriptor in self.registry.primaries() {
            if !ds.contains(&descriptor.name) {
                continue;
            }
            if let Some(config) = self.config.tests_for(&descriptor.name) {
                jobs.push((Job::Primary(descriptor.name.clone()), config));
            }
        }
        let mut groups = BTreeSet::new();
        for descriptor in self.registry.derived() {
            if !ds.contains(&descriptor.name) {
                continue;
            }
            if let Some(config) = self.config.group_test_for(&descriptor.name) {
                if groups.insert(config.name.clone()) {
                    jobs.push((Job::Group(config.name.clone()), config));
                }
            }
        }

        info!(
            battery = self.battery.name(),
            version = self.battery.version(),
            jobs = jobs.len(),
            "running test battery"
        );
        let runner = TestRunner::new(self.battery, self.registry, self.config.scale);
        let results: Vec<(Job, Result<RunOutcome>)> = jobs
            .into_par_iter()
            .map(|(job, config)| {
                let outcome = runner.run(ds, config);
                (job, outcome)
            })
            .collect();

        results
            .into_iter()
            .map(|(job, outcome)| outcome.map(|o| (job, o)))
            .collect()
    }

    fn worst_of_dependencies(&self, ds: &Dataset, deps: &[String]) -> Result<Vec<FlagValue>> {
        let mut merged: Option<Vec<FlagValue>> = None;
        for dep in deps {
            let flags = ds
                .flags(dep)
                .ok_or_else(|| Error::UnknownVariable {
                    name: Dataset::flag_variable_name(dep),
                })?;
            match merged.as_mut() {
                Some(acc) => merge_into(acc, &flags.flags),
                None => merged = Some(flags.flags.clone()),
            }
        }
        Ok(merged.unwrap_or_else(|| vec![self.config.scale.not_evaluated(); ds.len()]))
    }

    fn provenance_comment(&self, provenance: &Provenance) -> String {
        let mut comment = format!(
            "Quality control flags from {} ({} version {}).",
            self.config.battery_label, provenance.battery, provenance.version
        );
        if let Some(citation) = &provenance.citation {
            comment.push(' ');
            comment.push_str(citation);
        }
        comment.push_str(" Using config: ");
        comment.push_str(&provenance.config);
        comment
    }

    fn store(
        &self,
        ds: &mut Dataset,
        name: &str,
        flags: Vec<FlagValue>,
        comment: String,
    ) -> Result<()> {
        let expected = ds.len();
        let series = ds.flags_mut(name).ok_or_else(|| Error::UnknownVariable {
            name: Dataset::flag_variable_name(name),
        })?;
        if flags.len() != expected {
            return Err(Error::InconsistentLength {
                variable: Dataset::flag_variable_name(name),
                expected,
                actual: flags.len(),
            });
        }
        series.flags = flags;
        series.attrs.quality_control_set = 1;
        series.attrs.comment = comment;
        Ok(())
    }

    fn report(&self, ds: &Dataset, mut outcomes: BTreeMap<String, VariableOutcome>) -> AggregationReport {
        let variables = self
            .registry
            .descriptors()
            .iter()
            .filter_map(|d| {
                let outcome = outcomes.remove(&d.name)?;
                if let Some(summary) = outcome.summary() {
                    info!(
                        variable = %d.name,
                        flagged_percent = summary.flagged_percentage,
                        histogram = %summary.histogram,
                        "flags assigned"
                    );
                }
                Some(VariableReport {
                    variable: d.name.clone(),
                    role: d.role,
                    outcome,
                })
            })
            .collect();
        AggregationReport {
            scale: self.config.scale,
            observations: ds.len(),
            variables,
        }
    }
}
