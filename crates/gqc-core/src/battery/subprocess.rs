//! Test battery hosted in an external program.
//!
//! The program receives one request as JSON on stdin and answers with the
//! per-test results as JSON on stdout. Any language's QC library can be
//! wrapped this way without linking it into the pipeline.
//!
//! # Protocol (stdin → stdout)
//!
//! **Input**:
//! ```json
//! {
//!   "protocol": 1,
//!   "slice": {
//!     "time": ["2022-05-01T00:00:00Z", "..."],
//!     "latitude": [57.1, ...],
//!     "longitude": [11.2, ...],
//!     "variables": {"TEMP": [10.1, null, ...]},
//!     "mean_latitude": 57.1,
//!     "mean_longitude": 11.2,
//!     "mean_time": "2022-05-01T06:00:00Z"
//!   },
//!   "config": {"name": "temperature", "variables": [{"variable": "TEMP", "tests": [...]}]}
//! }
//! ```
//!
//! **Output**:
//! ```json
//! {
//!   "battery": "ioos_qc",
//!   "version": "2.1.0",
//!   "results": [
//!     {"test": "gross_range_test", "variable": "TEMP", "flags": [1, 1, 3]}
//!   ]
//! }
//! ```

use gqc_config::GroupTestConfig;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, warn};

use super::{BatteryError, DataSlice, TestBattery, TestOutcome};

/// Protocol revision sent with every request.
pub const PROTOCOL_VERSION: u32 = 1;

/// Cap on accepted stdout size.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Serialize)]
pub struct BatteryRequest<'a> {
    pub protocol: u32,
    pub slice: &'a DataSlice<'a>,
    pub config: &'a GroupTestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatteryResponse {
    pub battery: String,
    pub version: String,
    pub results: Vec<TestOutcome>,
}

/// Parse raw stdout from a battery program.
pub fn parse_battery_output(stdout: &[u8]) -> Result<BatteryResponse, BatteryError> {
    Ok(serde_json::from_slice(stdout)?)
}

#[derive(Debug, Clone)]
pub struct SubprocessBattery {
    name: String,
    version: String,
    program: PathBuf,
    args: Vec<String>,
    max_output_bytes: usize,
}

impl SubprocessBattery {
    /// Battery named after the program's file stem, version unknown.
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        let program = program.into();
        let name = program
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "subprocess".to_string());
        Self {
            name,
            version: "unknown".to_string(),
            program,
            args,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn with_max_output_bytes(mut self, limit: usize) -> Self {
        self.max_output_bytes = limit;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn invoke(&self, input: &[u8]) -> Result<Vec<u8>, BatteryError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let not_captured = |pipe: &str| BatteryError::ExecutionFailed(format!("{pipe} not captured"));
        let mut stdin = child.stdin.take().ok_or_else(|| not_captured("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| not_captured("stdout"))?;
        let mut stderr = child.stderr.take().ok_or_else(|| not_captured("stderr"))?;

        // stdin and stderr get their own threads so a chatty program cannot
        // deadlock against a full pipe. stdout is read at most one byte past
        // the cap; a program still writing after that is killed.
        let limit = self.max_output_bytes;
        let (read, written, errors) = std::thread::scope(|s| {
            let writer = s.spawn(move || stdin.write_all(input));
            let errors = s.spawn(move || {
                let mut buf = Vec::new();
                stderr.read_to_end(&mut buf).map(|_| buf)
            });
            let mut buf = Vec::new();
            let read = stdout
                .take((limit as u64).saturating_add(1))
                .read_to_end(&mut buf)
                .map(|_| buf);
            if read.as_ref().is_ok_and(|buf| buf.len() > limit) {
                if let Err(e) = child.kill() {
                    debug!(error = %e, "battery already exited");
                }
            }
            (read, writer.join(), errors.join())
        });

        let stdout = read?;
        if stdout.len() > limit {
            child.wait()?;
            return Err(BatteryError::OutputTooLarge { limit });
        }
        let status = child.wait()?;
        let stderr = errors.map_err(|_| thread_panicked("stderr reader"))??;

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(BatteryError::ExecutionFailed(format!(
                "{} exited with {}: {}",
                self.program.display(),
                status,
                stderr.trim()
            )));
        }
        match written.map_err(|_| thread_panicked("stdin writer"))? {
            Ok(()) => {}
            Err(e) => warn!(error = %e, "battery closed stdin early"),
        }
        Ok(stdout)
    }
}

fn thread_panicked(what: &str) -> BatteryError {
    BatteryError::ExecutionFailed(format!("{what} panicked"))
}

impl TestBattery for SubprocessBattery {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn run_tests(
        &self,
        slice: &DataSlice<'_>,
        config: &GroupTestConfig,
    ) -> Result<Vec<TestOutcome>, BatteryError> {
        let request = BatteryRequest {
            protocol: PROTOCOL_VERSION,
            slice,
            config,
        };
        let input = serde_json::to_vec(&request)?;
        debug!(
            program = %self.program.display(),
            group = %config.name,
            bytes = input.len(),
            "invoking battery"
        );

        let stdout = self.invoke(&input)?;
        let response = parse_battery_output(&stdout)?;
        if response.battery != self.name || response.version != self.version {
            debug!(
                reported = %response.battery,
                reported_version = %response.version,
                "battery identity differs from configured name"
            );
        }
        Ok(response.results)
    }
}
