//! Interface to the external classification engine.
//!
//! The engine builds the actual matching structure and measures it. It is
//! consumed as a black box through [`ClassificationEngine`];
//! [`ProcessEngine`] drives the real binary.

pub mod metrics;
mod process;

pub use metrics::{parse_estimate, parse_metrics, BuildMetrics};
pub use process::ProcessEngine;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::Result;

/// Rule representation the engine builds from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    /// Range rules (`-a 0`)
    Range,
    /// Prefix rules (`-a 1`)
    Prefix,
}

impl EngineMode {
    /// Value of the engine's `-a` flag.
    pub fn flag(&self) -> &'static str {
        match self {
            EngineMode::Range => "0",
            EngineMode::Prefix => "1",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineMode::Range => "range",
            EngineMode::Prefix => "prefix",
        }
    }
}

impl fmt::Display for EngineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A classification engine reachable by rule and trace file paths.
///
/// Every call is single-shot and blocking. Files passed in must already be
/// fully written.
pub trait ClassificationEngine: Send + Sync {
    /// Estimated build time in microseconds for a range-form rule file.
    fn estimate(&self, rules: &Path) -> Result<f64>;

    /// Build from `rules` and search `trace`. Build and search times are
    /// always present in a successful result.
    fn build(&self, mode: EngineMode, rules: &Path, trace: &Path) -> Result<BuildMetrics>;

    /// Build from `base`, apply `delta` as an incremental update, then search
    /// `trace`. Update and search times are always present in a successful
    /// result.
    fn update(&self, mode: EngineMode, base: &Path, delta: &Path, trace: &Path)
        -> Result<BuildMetrics>;
}

impl<E: ClassificationEngine + ?Sized> ClassificationEngine for &E {
    fn estimate(&self, rules: &Path) -> Result<f64> {
        (**self).estimate(rules)
    }

    fn build(&self, mode: EngineMode, rules: &Path, trace: &Path) -> Result<BuildMetrics> {
        (**self).build(mode, rules, trace)
    }

    fn update(
        &self,
        mode: EngineMode,
        base: &Path,
        delta: &Path,
        trace: &Path,
    ) -> Result<BuildMetrics> {
        (**self).update(mode, base, delta, trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_flags() {
        assert_eq!(EngineMode::Range.flag(), "0");
        assert_eq!(EngineMode::Prefix.flag(), "1");
        assert_eq!(EngineMode::Prefix.to_string(), "prefix");
    }
}
