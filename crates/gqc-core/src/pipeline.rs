//! End-to-end QC run: aggregate, override, annotate, optionally mask.
//!
//! The pipeline works on a copy of the dataset and swaps it in only when
//! every stage succeeded, so a fatal error leaves the caller's dataset as
//! it was.

use chrono::{SecondsFormat, Utc};
use gqc_common::{FlagScale, Result, RunId};
use gqc_config::{validate_config, QcConfig};
use serde::Serialize;
use tracing::info;

use crate::aggregate::{AggregationReport, FlagAggregator};
use crate::battery::TestBattery;
use crate::dataset::{Dataset, REQUIRED_VARIABLES};
use crate::masking::{apply_threshold, MaskReport};
use crate::overrides::{OverrideEngine, OverrideReport};
use crate::registry::VariableRegistry;

/// Everything one run did, printed by `gqc flag`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub preset: String,
    pub scale: FlagScale,
    pub battery: String,
    pub battery_version: String,
    pub observations: usize,
    pub aggregation: AggregationReport,
    pub overrides: Vec<OverrideReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub masking: Option<MaskReport>,
}

pub struct QcPipeline {
    config: QcConfig,
    registry: VariableRegistry,
    battery: Box<dyn TestBattery>,
}

impl QcPipeline {
    pub fn new(config: QcConfig, registry: VariableRegistry, battery: Box<dyn TestBattery>) -> Self {
        Self {
            config,
            registry,
            battery,
        }
    }

    pub fn run(&self, ds: &mut Dataset) -> Result<RunReport> {
        validate_config(&self.config)?;
        self.registry.check_config(&self.config)?;
        ds.validate()?;
        ds.require(&REQUIRED_VARIABLES)?;

        let run_id = RunId::new();
        info!(
            run_id = %run_id,
            preset = %self.config.preset,
            scale = %self.config.scale,
            observations = ds.len(),
            "starting QC run"
        );

        let mut work = ds.clone();
        let aggregation = FlagAggregator::new(&self.config, &self.registry, self.battery.as_ref())
            .aggregate(&mut work)?;
        let overrides =
            OverrideEngine::new(self.config.scale).apply_all(&mut work, &self.config.overrides);

        work.set_attr("processing_level", self.config.processing_level.as_str());
        work.set_attr("disclaimer", self.config.disclaimer.as_str());
        work.set_attr("qc_preset", self.config.preset.as_str());
        work.set_attr("qc_run_id", run_id.to_string());
        work.set_attr(
            "date_quality_controlled",
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        );

        let masking = self
            .config
            .masking
            .enabled
            .then(|| apply_threshold(&mut work, &self.config.masking));
        if let Some(report) = &masking {
            info!(masked = report.total(), "masking applied");
        }

        *ds = work;
        info!(
            run_id = %run_id,
            evaluated = aggregation.evaluated_count(),
            "QC run complete"
        );

        Ok(RunReport {
            run_id,
            preset: self.config.preset.clone(),
            scale: self.config.scale,
            battery: self.battery.name().to_string(),
            battery_version: self.battery.version().to_string(),
            observations: ds.len(),
            aggregation,
            overrides,
            masking,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battery::ReplayBattery;
    use chrono::TimeZone;
    use gqc_common::Error;
    use gqc_config::{get_preset, PresetName};

    fn dataset(n: usize) -> Dataset {
        let time = (0..n)
            .map(|i| Utc.timestamp_opt(1_650_000_000 + 60 * i as i64, 0).unwrap())
            .collect();
        Dataset::new(time)
            .with_variable("latitude", vec![57.5; n])
            .unwrap()
            .with_variable("longitude", vec![11.5; n])
            .unwrap()
            .with_variable("temperature", vec![10.0, 11.0, 35.0])
            .unwrap()
            .with_variable("oxygen_concentration", vec![250.0; n])
            .unwrap()
            .with_attr(
                "oxygen",
                "{'make_model': 'RBR coda T.ODO', 'calibration_date': '2021-03-01'}",
            )
    }

    fn battery() -> Box<dyn TestBattery> {
        Box::new(
            ReplayBattery::new("ioos_qc", "2.1.0")
                .with_result("TEMP", "gross_range_test", vec![1, 1, 3])
                .with_result("oxygen_concentration", "gross_range_test", vec![1, 4, 1]),
        )
    }

    #[test]
    fn full_run_sets_attributes_and_overrides() {
        let mut ds = dataset(3);
        let pipeline = QcPipeline::new(
            get_preset(PresetName::IoosQartodV1),
            VariableRegistry::glider(),
            battery(),
        );
        let report = pipeline.run(&mut ds).unwrap();

        assert_eq!(ds.attr_text("processing_level"), Some("L1. Quality control flags"));
        assert_eq!(ds.attr_text("qc_preset"), Some("ioos-qartod-v1"));
        assert_eq!(ds.attr_text("qc_run_id"), Some(report.run_id.0.as_str()));
        assert!(ds.attr_text("disclaimer").unwrap().contains("VOTO"));
        assert_eq!(ds.flags("oxygen_concentration").unwrap().flags, vec![3, 4, 3]);
        assert_eq!(ds.flags("temperature").unwrap().flags, vec![1, 1, 3]);
        assert!(report.masking.is_none());
        assert_eq!(report.battery, "ioos_qc");
    }

    #[test]
    fn masking_runs_when_enabled() {
        let mut config = get_preset(PresetName::IoosQartodV1);
        config.masking.enabled = true;
        let mut ds = dataset(3);
        let report = QcPipeline::new(config, VariableRegistry::glider(), battery())
            .run(&mut ds)
            .unwrap();
        let temp = &ds.variable("temperature").unwrap().values;
        assert!(temp[2].is_nan());
        assert_eq!(temp[0], 10.0);
        // every oxygen value sits at 3 or worse after the override
        assert_eq!(report.masking.unwrap().masked_for("oxygen_concentration"), 3);
    }

    #[test]
    fn failure_leaves_dataset_untouched() {
        let mut ds = dataset(3);
        let before = ds.clone();
        let short = Box::new(
            ReplayBattery::new("ioos_qc", "2.1.0").with_result("TEMP", "spike_test", vec![1]),
        );
        let err = QcPipeline::new(
            get_preset(PresetName::IoosQartodV1),
            VariableRegistry::glider(),
            short,
        )
        .run(&mut ds)
        .unwrap_err();
        assert!(matches!(err, Error::InconsistentLength { .. }));
        assert_eq!(ds, before);
    }

    #[test]
    fn misspelled_names_abort_the_run() {
        let mut renamed = get_preset(PresetName::IoosQartodV1);
        let tests = renamed.variable_tests.remove("temperature").unwrap();
        renamed.variable_tests.insert("temprature".into(), tests);

        let mut bad_target = get_preset(PresetName::IoosQartodV1);
        bad_target.overrides[0].target = "oxygen_concentraton".into();

        let mut bad_threshold = get_preset(PresetName::IoosQartodV1);
        bad_threshold.masking.thresholds.insert("salinty".into(), 3);

        for (config, typo) in [
            (renamed, "temprature"),
            (bad_target, "oxygen_concentraton"),
            (bad_threshold, "salinty"),
        ] {
            let mut ds = dataset(3);
            let before = ds.clone();
            let err = QcPipeline::new(config, VariableRegistry::glider(), battery())
                .run(&mut ds)
                .unwrap_err();
            assert!(matches!(err, Error::UnknownVariable { ref name } if name == typo));
            assert_eq!(crate::exit_codes::ExitCode::for_error(&err).as_i32(), 11);
            assert_eq!(ds, before);
        }
    }

    #[test]
    fn test_tables_are_keyed_by_role() {
        let mut config = get_preset(PresetName::IoosQartodV1);
        let tests = config.variable_tests["temperature"].clone();
        config.variable_tests.insert("density".into(), tests);
        let err = QcPipeline::new(config, VariableRegistry::glider(), battery())
            .run(&mut dataset(3))
            .unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("density")));
    }

    #[test]
    fn empty_dataset_reports_zero_percent() {
        let mut ds = Dataset::new(Vec::new())
            .with_variable("latitude", vec![])
            .unwrap()
            .with_variable("longitude", vec![])
            .unwrap()
            .with_variable("temperature", vec![])
            .unwrap();
        let report = QcPipeline::new(
            get_preset(PresetName::IoosQartodV1),
            VariableRegistry::glider(),
            battery(),
        )
        .run(&mut ds)
        .unwrap();
        assert_eq!(report.observations, 0);
        let summary = report.aggregation.get("temperature").unwrap().summary().unwrap();
        assert_eq!(summary.flagged_percentage, 0.0);
        assert!(ds.flags("temperature").unwrap().is_empty());
    }

    #[test]
    fn missing_axis_is_fatal() {
        let time = vec![Utc.timestamp_opt(1_650_000_000, 0).unwrap()];
        let mut ds = Dataset::new(time).with_variable("latitude", vec![57.0]).unwrap();
        let err = QcPipeline::new(
            get_preset(PresetName::IoosQartodV1),
            VariableRegistry::glider(),
            battery(),
        )
        .run(&mut ds)
        .unwrap_err();
        assert!(matches!(err, Error::MissingRequired { ref name } if name == "longitude"));
    }
}
