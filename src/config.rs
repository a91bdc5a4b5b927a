//! Controller configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::category::DEFAULT_THRESHOLD;
use crate::rule::IdAssignment;
use crate::{Error, Result};

/// Arguments passed to the external trace generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceParams {
    /// Pareto distribution parameter `a` (locality)
    pub pareto_a: u32,
    /// Pareto distribution parameter `b` (locality)
    pub pareto_b: u32,
    /// Packets generated per rule
    pub scale: u32,
}

impl Default for TraceParams {
    fn default() -> Self {
        Self {
            pareto_a: 1,
            pareto_b: 0,
            scale: 10,
        }
    }
}

/// Configuration shared by the controllers.
///
/// Passed by value at construction; nothing here is global.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Classification engine executable
    pub engine_binary: PathBuf,
    /// Trace generator executable
    pub trace_generator_binary: PathBuf,
    /// Trace generator arguments
    pub trace_params: TraceParams,
    /// Address-space fraction separating small from large ranges
    pub category_threshold: f64,
    /// Largest partition handed to the engine before it is sharded
    pub max_rules_per_set: usize,
    /// Minimum number of shards an oversized category is split into. Capped
    /// at the category's rule count, so no shard is ever empty.
    pub shard_count: usize,
    /// Full-volume build tolerance in microseconds
    pub tolerance_us: f64,
    /// Tolerance used when an update forces a full rebuild
    pub update_tolerance_us: f64,
    /// Id assignment for prefix expansion
    pub prefix_ids: IdAssignment,
    /// Seed for shard shuffling; random when unset
    pub shuffle_seed: Option<u64>,
    /// Build independent partitions concurrently
    pub parallel_builds: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine_binary: PathBuf::from("./SmartUpdate"),
            trace_generator_binary: PathBuf::from("./trace_generator"),
            trace_params: TraceParams::default(),
            category_threshold: DEFAULT_THRESHOLD,
            max_rules_per_set: 3000,
            shard_count: 2,
            tolerance_us: 5e6,
            update_tolerance_us: 1e6,
            prefix_ids: IdAssignment::default(),
            shuffle_seed: None,
            parallel_builds: false,
        }
    }
}

impl Config {
    /// Parse a YAML document. Missing keys take their defaults.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML config file.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::file(path, e))?;
        Self::from_yaml(&content)
    }

    /// Reject values the controllers cannot work with.
    ///
    /// A `shard_count` larger than some category is accepted; sharding then
    /// puts one rule in each shard of that category.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.category_threshold) {
            return Err(Error::Config(format!(
                "category_threshold must be within [0, 1], got {}",
                self.category_threshold
            )));
        }
        if self.max_rules_per_set == 0 {
            return Err(Error::Config("max_rules_per_set must be positive".into()));
        }
        if self.shard_count == 0 {
            return Err(Error::Config("shard_count must be positive".into()));
        }
        if self.tolerance_us < 0.0 || self.update_tolerance_us < 0.0 {
            return Err(Error::Config("tolerances must not be negative".into()));
        }
        Ok(())
    }
}
