//! Known-defect overrides applied after aggregation.
//!
//! A rule floors the target's flags at `minimum_flag` when the instrument
//! metadata identifies an affected sensor batch. Applying a rule twice
//! gives the same flags and the same comment as applying it once.

use gqc_common::{worse, FlagScale};
use gqc_config::OverrideRuleConfig;
use serde::Serialize;
use tracing::{info, warn};

use crate::dataset::Dataset;
use crate::instrument::parse_instrument_metadata;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OverrideOutcome {
    /// Predicate held; `raised` observations got a worse flag.
    Applied { raised: usize },
    /// Metadata parsed, but the instrument is not affected.
    NotTriggered,
    /// The rule could not be evaluated; the dataset is untouched.
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverrideReport {
    pub rule: String,
    pub target: String,
    #[serde(flatten)]
    pub outcome: OverrideOutcome,
}

pub struct OverrideEngine {
    scale: FlagScale,
}

impl OverrideEngine {
    pub fn new(scale: FlagScale) -> Self {
        Self { scale }
    }

    /// Evaluate `rule` against `ds` and floor the target flags if it fires.
    pub fn apply(&self, ds: &mut Dataset, rule: &OverrideRuleConfig) -> OverrideOutcome {
        let outcome = self.evaluate(ds, rule);
        match &outcome {
            OverrideOutcome::Applied { raised } => info!(
                rule = %rule.name,
                target = %rule.target,
                raised,
                "override applied"
            ),
            OverrideOutcome::NotTriggered => {
                info!(rule = %rule.name, "instrument not affected")
            }
            OverrideOutcome::Skipped { reason } => {
                warn!(rule = %rule.name, %reason, "override skipped")
            }
        }
        outcome
    }

    /// Apply rules in order.
    pub fn apply_all(&self, ds: &mut Dataset, rules: &[OverrideRuleConfig]) -> Vec<OverrideReport> {
        rules
            .iter()
            .map(|rule| OverrideReport {
                rule: rule.name.clone(),
                target: rule.target.clone(),
                outcome: self.apply(ds, rule),
            })
            .collect()
    }

    fn evaluate(&self, ds: &mut Dataset, rule: &OverrideRuleConfig) -> OverrideOutcome {
        if !self.scale.is_valid(rule.minimum_flag) {
            return skipped(format!(
                "minimum flag {} outside the {} domain",
                rule.minimum_flag, self.scale
            ));
        }
        let Some(raw) = ds.attr_text(&rule.metadata_attribute) else {
            return skipped(format!("no '{}' attribute", rule.metadata_attribute));
        };
        let meta = match parse_instrument_metadata(raw) {
            Ok(meta) => meta,
            Err(e) => return skipped(e.to_string()),
        };
        let family = match meta.require(&rule.family_field) {
            Ok(family) => family.to_lowercase(),
            Err(e) => return skipped(e.to_string()),
        };
        let calibrated = match meta.calibration_date(&rule.calibration_field) {
            Ok(date) => date,
            Err(e) => return skipped(e.to_string()),
        };

        let affected = family.contains(&rule.family_marker.to_lowercase())
            && calibrated < rule.calibrated_before;
        if !affected {
            return OverrideOutcome::NotTriggered;
        }

        let Some(series) = ds.flags_mut(&rule.target) else {
            return skipped(format!("no flag series for {}", rule.target));
        };
        let mut raised = 0;
        for flag in series.flags.iter_mut() {
            let floored = worse(*flag, rule.minimum_flag);
            if floored != *flag {
                *flag = floored;
                raised += 1;
            }
        }
        if !series.attrs.comment.starts_with(&rule.comment) {
            series.attrs.comment = format!("{} {}", rule.comment, series.attrs.comment);
        }
        series.attrs.quality_control_set = 1;
        OverrideOutcome::Applied { raised }
    }
}

fn skipped(reason: String) -> OverrideOutcome {
    OverrideOutcome::Skipped { reason }
}
