//! Exit codes for the gqc CLI.
//!
//! Scripts wrapping a deployment's processing chain branch on these, so
//! they are stable.

use gqc_common::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Run completed; output written.
    Clean = 0,

    /// Bad preset, config bundle, or CLI argument
    ConfigError = 10,

    /// Dataset failed validation (lengths, required axes, flag domain)
    DataError = 11,

    /// Test battery failed or returned unusable output
    BatteryError = 12,

    /// Reading input or writing output failed
    IoError = 13,

    /// Internal/unknown error
    InternalError = 99,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Map an error to its exit code by error class.
    pub fn for_error(err: &Error) -> Self {
        match err.code() {
            10..=19 => ExitCode::ConfigError,
            20..=39 => ExitCode::DataError,
            40..=49 => ExitCode::BatteryError,
            60 => ExitCode::IoError,
            61 => ExitCode::DataError,
            _ => ExitCode::InternalError,
        }
    }
}
