//! Engine driven as a child process.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::metrics::{self, BuildMetrics};
use super::{ClassificationEngine, EngineMode};
use crate::{Config, Error, Result};

/// Runs the engine binary once per call and parses its stdout.
///
/// Command line contract:
/// - estimate: `-a 0 -e 1 -r <rules> -s 1`
/// - build: `-a <mode> -r <rules> -t <trace>`
/// - update: `-a <mode> -r <base> -u <delta> -t <trace> -s 2`
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    program: PathBuf,
}

impl ProcessEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.engine_binary.clone())
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Run the engine and return its stdout lines.
    fn run(&self, args: &[&OsStr]) -> Result<Vec<String>> {
        log::debug!("running {:?} {:?}", self.program, args);

        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| Error::EngineFailure {
                program: self.program.display().to_string(),
                status: None,
                stderr: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(Error::EngineFailure {
                program: self.program.display().to_string(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect())
    }
}

impl ClassificationEngine for ProcessEngine {
    fn estimate(&self, rules: &Path) -> Result<f64> {
        let lines = self.run(&[
            OsStr::new("-a"),
            OsStr::new(EngineMode::Range.flag()),
            OsStr::new("-e"),
            OsStr::new("1"),
            OsStr::new("-r"),
            rules.as_os_str(),
            OsStr::new("-s"),
            OsStr::new("1"),
        ])?;

        metrics::parse_estimate(&lines)?.ok_or_else(|| Error::MissingMetric {
            metric: metrics::ESTIMATED_TIME,
            rules: rules.to_path_buf(),
        })
    }

    fn build(&self, mode: EngineMode, rules: &Path, trace: &Path) -> Result<BuildMetrics> {
        let lines = self.run(&[
            OsStr::new("-a"),
            OsStr::new(mode.flag()),
            OsStr::new("-r"),
            rules.as_os_str(),
            OsStr::new("-t"),
            trace.as_os_str(),
        ])?;

        let metrics = metrics::parse_metrics(&lines)?;
        metrics.build_time(rules)?;
        metrics.search_time(rules)?;
        Ok(metrics)
    }

    fn update(
        &self,
        mode: EngineMode,
        base: &Path,
        delta: &Path,
        trace: &Path,
    ) -> Result<BuildMetrics> {
        let lines = self.run(&[
            OsStr::new("-a"),
            OsStr::new(mode.flag()),
            OsStr::new("-r"),
            base.as_os_str(),
            OsStr::new("-u"),
            delta.as_os_str(),
            OsStr::new("-t"),
            trace.as_os_str(),
            OsStr::new("-s"),
            OsStr::new("2"),
        ])?;

        let metrics = metrics::parse_metrics(&lines)?;
        metrics.update_time(delta)?;
        metrics.search_time(delta)?;
        Ok(metrics)
    }
}
