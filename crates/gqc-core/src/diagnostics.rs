//! Per-variable flag statistics.

use gqc_common::{FlagScale, FlagValue};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Percentage of observations strictly worse than good and not missing.
/// An empty series reports 0.0.
pub fn flagged_percentage(flags: &[FlagValue], scale: FlagScale) -> f64 {
    if flags.is_empty() {
        return 0.0;
    }
    let flagged = flags.iter().filter(|f| scale.is_flagged(**f)).count();
    100.0 * flagged as f64 / flags.len() as f64
}

/// Count of each flag code in a series.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlagHistogram {
    counts: BTreeMap<FlagValue, usize>,
    total: usize,
}

impl FlagHistogram {
    pub fn from_flags(flags: &[FlagValue]) -> Self {
        let mut hist = Self::default();
        for f in flags {
            *hist.counts.entry(*f).or_insert(0) += 1;
        }
        hist.total = flags.len();
        hist
    }

    pub fn count(&self, flag: FlagValue) -> usize {
        self.counts.get(&flag).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn iter(&self) -> impl Iterator<Item = (FlagValue, usize)> + '_ {
        self.counts.iter().map(|(f, c)| (*f, *c))
    }
}

impl fmt::Display for FlagHistogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.iter().map(|(flag, n)| format!("{flag}:{n}")).collect();
        write!(f, "[{}]", parts.join(" "))
    }
}

/// Summary logged and reported for one flag series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlagSummary {
    pub flagged_percentage: f64,
    pub bad: usize,
    pub histogram: FlagHistogram,
}

impl FlagSummary {
    pub fn of(flags: &[FlagValue], scale: FlagScale) -> Self {
        Self {
            flagged_percentage: flagged_percentage(flags, scale),
            bad: flags.iter().filter(|f| scale.is_bad(**f)).count(),
            histogram: FlagHistogram::from_flags(flags),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_excludes_good_and_missing() {
        let flags = [1, 2, 3, 4, 9];
        assert!((flagged_percentage(&flags, FlagScale::Qartod) - 60.0).abs() < 1e-9);
    }

    #[test]
    fn empty_series_is_zero_percent() {
        assert_eq!(flagged_percentage(&[], FlagScale::Imos), 0.0);
        let summary = FlagSummary::of(&[], FlagScale::Imos);
        assert_eq!(summary.bad, 0);
        assert_eq!(summary.histogram.total(), 0);
    }

    #[test]
    fn histogram_counts_codes() {
        let hist = FlagHistogram::from_flags(&[1, 1, 4, 9, 1]);
        assert_eq!(hist.count(1), 3);
        assert_eq!(hist.count(4), 1);
        assert_eq!(hist.count(3), 0);
        assert_eq!(hist.to_string(), "[1:3 4:1 9:1]");
    }

    #[test]
    fn bad_count_follows_scale() {
        let flags = [3, 4, 1];
        assert_eq!(FlagSummary::of(&flags, FlagScale::Imos).bad, 2);
        assert_eq!(FlagSummary::of(&flags, FlagScale::Qartod).bad, 1);
    }
}
