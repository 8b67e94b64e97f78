//! Glider QC: flag aggregation, overrides, and masking.
//!
//! Per-observation quality flags are produced by an external
//! [`TestBattery`](battery::TestBattery), rolled into one flag series per
//! monitored variable, propagated to derived quantities, adjusted for known
//! instrument defects, and optionally used to blank bad values.
//!
//! [`QcPipeline`](pipeline::QcPipeline) runs the stages in order against a
//! [`Dataset`](dataset::Dataset).

pub mod aggregate;
pub mod battery;
pub mod dataset;
pub mod diagnostics;
pub mod exit_codes;
pub mod instrument;
pub mod logging;
pub mod masking;
pub mod overrides;
pub mod pipeline;
pub mod registry;

pub use aggregate::{AggregationReport, FlagAggregator, SkipReason, VariableOutcome};
pub use battery::{ReplayBattery, SubprocessBattery, TestBattery};
pub use dataset::{Dataset, FlagVariable, Variable, MISSING_VALUE};
pub use exit_codes::ExitCode;
pub use pipeline::{QcPipeline, RunReport};
pub use registry::VariableRegistry;
