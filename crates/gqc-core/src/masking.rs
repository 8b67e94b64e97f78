//! Replace values whose flag is worse than an acceptance threshold.

use gqc_config::MaskingConfig;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::dataset::{Dataset, MISSING_VALUE};

/// Masked observation counts per variable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaskReport {
    pub masked: BTreeMap<String, usize>,
}

impl MaskReport {
    pub fn total(&self) -> usize {
        self.masked.values().sum()
    }

    pub fn masked_for(&self, variable: &str) -> usize {
        self.masked.get(variable).copied().unwrap_or(0)
    }
}

/// For every variable with a flag series, set values whose flag is strictly
/// worse than its threshold to [`MISSING_VALUE`]. Flags are not changed.
pub fn apply_threshold(ds: &mut Dataset, masking: &MaskingConfig) -> MaskReport {
    let mut report = MaskReport::default();
    let (variables, flags) = ds.values_and_flags_mut();
    for (name, series) in flags {
        let Some(variable) = variables.get_mut(name) else {
            continue;
        };
        let threshold = masking.threshold_for(name);
        let mut count = 0;
        for (value, flag) in variable.values.iter_mut().zip(&series.flags) {
            if *flag > threshold {
                *value = MISSING_VALUE;
                count += 1;
            }
        }
        debug!(variable = %name, threshold, masked = count, "masked");
        report.masked.insert(name.clone(), count);
    }
    report
}
