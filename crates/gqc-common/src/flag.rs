//! Ordinal QC flag scales and the worst-flag merge algebra.
//!
//! Both supported conventions encode "worse" as "numerically larger", so
//! merging two flags is a plain maximum. The active scale is chosen once per
//! run and carried alongside every flag series it produced.
//!
//! | Scale  | Domain          | Not evaluated | Good | Bad  | Missing |
//! |--------|-----------------|---------------|------|------|---------|
//! | IMOS   | 0..=9           | 0             | 1    | 4    | 9       |
//! | QARTOD | {1, 2, 3, 4, 9} | 2 (UNKNOWN)   | 1    | 4    | 9       |

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single ordinal QC flag.
pub type FlagValue = u8;

const IMOS_VALUES: [FlagValue; 10] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9];
const IMOS_MEANINGS: [&str; 10] = [
    "no_qc_performed",
    "good_data",
    "probably_good_data",
    "bad_data_that_are_potentially_correctable",
    "bad_data",
    "value_changed",
    "not_used",
    "not_used",
    "interpolated_values",
    "missing_values",
];

const QARTOD_VALUES: [FlagValue; 5] = [1, 2, 3, 4, 9];
const QARTOD_MEANINGS: [&str; 5] = ["GOOD", "UNKNOWN", "SUSPECT", "FAIL", "MISSING"];

/// Flag convention active for a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagScale {
    /// IMOS standard flags, 0–9.
    Imos,
    /// IOOS QARTOD flags, {1, 2, 3, 4, 9}.
    Qartod,
}

impl FlagScale {
    pub fn good(self) -> FlagValue {
        1
    }

    pub fn bad(self) -> FlagValue {
        4
    }

    /// Value a series holds before any test has touched it.
    pub fn not_evaluated(self) -> FlagValue {
        match self {
            FlagScale::Imos => 0,
            FlagScale::Qartod => 2,
        }
    }

    pub fn missing(self) -> FlagValue {
        9
    }

    pub fn valid_min(self) -> FlagValue {
        match self {
            FlagScale::Imos => 0,
            FlagScale::Qartod => 1,
        }
    }

    pub fn valid_max(self) -> FlagValue {
        9
    }

    pub fn flag_values(self) -> &'static [FlagValue] {
        match self {
            FlagScale::Imos => &IMOS_VALUES,
            FlagScale::Qartod => &QARTOD_VALUES,
        }
    }

    pub fn flag_meanings(self) -> &'static [&'static str] {
        match self {
            FlagScale::Imos => &IMOS_MEANINGS,
            FlagScale::Qartod => &QARTOD_MEANINGS,
        }
    }

    /// Name written to the `quality_control_conventions` attribute.
    pub fn conventions(self) -> &'static str {
        match self {
            FlagScale::Imos => "IMOS standard flags",
            FlagScale::Qartod => "IOOS QARTOD standard flags",
        }
    }

    /// Whether `flag` is a member of this scale's domain.
    pub fn is_valid(self, flag: FlagValue) -> bool {
        self.flag_values().contains(&flag)
    }

    /// Whether `flag` falls in the failing range.
    pub fn is_bad(self, flag: FlagValue) -> bool {
        match self {
            FlagScale::Imos => matches!(flag, 3 | 4),
            FlagScale::Qartod => flag == 4,
        }
    }

    /// Worse than good but not the missing code. This is the population
    /// counted by the "flagged as bad" percentage diagnostic.
    pub fn is_flagged(self, flag: FlagValue) -> bool {
        flag > self.good() && flag < self.missing()
    }

    /// Human-readable label for a flag value, if it is in the domain.
    pub fn meaning(self, flag: FlagValue) -> Option<&'static str> {
        self.flag_values()
            .iter()
            .position(|v| *v == flag)
            .map(|i| self.flag_meanings()[i])
    }
}

impl fmt::Display for FlagScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagScale::Imos => write!(f, "imos"),
            FlagScale::Qartod => write!(f, "qartod"),
        }
    }
}

/// The worse of two flags.
#[inline]
pub fn worse(a: FlagValue, b: FlagValue) -> FlagValue {
    a.max(b)
}

/// Fold `worse` over any number of flags. `None` for an empty input.
pub fn worst_of<I: IntoIterator<Item = FlagValue>>(flags: I) -> Option<FlagValue> {
    flags.into_iter().reduce(worse)
}

/// Elementwise max-merge of `src` into `dst`.
///
/// Both slices must have the same length; callers check this against the
/// dataset observation count before merging.
pub fn merge_into(dst: &mut [FlagValue], src: &[FlagValue]) {
    debug_assert_eq!(dst.len(), src.len());
    for (d, s) in dst.iter_mut().zip(src) {
        *d = worse(*d, *s);
    }
}
