//! Full-volume build controller.
//!
//! A rule set whose estimated build time fits the tolerance is built in one
//! piece. Anything larger is split by category (and sharded when a category
//! is too big), and each partition is built on its own. Reported totals are
//! the sum over partitions: a serial upper bound, not a parallel estimate.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::path::{Path, PathBuf};

use super::Strategy;
use crate::engine::{BuildMetrics, ClassificationEngine, EngineMode};
use crate::output::suffixed;
use crate::partition::{persist, PartitionId, Partitions, RuleGrouper};
use crate::rule::prefix::{save_prefix_rules, to_prefix_rules};
use crate::rule::RuleSet;
use crate::{Config, Result};

/// Result of building one partition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionReport {
    pub id: PartitionId,
    pub name: String,
    /// Range rules in the partition
    pub rules: usize,
    /// File handed to the engine
    pub path: PathBuf,
    pub mode: EngineMode,
    pub metrics: BuildMetrics,
}

/// Result of a full-volume build.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FullVolumeReport {
    pub strategy: Strategy,
    pub estimated_us: f64,
    pub tolerance_us: f64,
    /// False when the set was built directly in one piece
    pub partitioned: bool,
    pub partitions: Vec<PartitionReport>,
    pub totals: BuildMetrics,
}

/// A partition file ready for the engine.
#[derive(Debug, Clone)]
struct BuildJob {
    id: PartitionId,
    rules: usize,
    path: PathBuf,
    mode: EngineMode,
}

/// Chooses between a direct build and a partitioned build.
pub struct StrategyController<E> {
    config: Config,
    engine: E,
}

impl<E: ClassificationEngine> StrategyController<E> {
    pub fn new(config: Config, engine: E) -> Self {
        Self { config, engine }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Estimate, then build `rule_set_path` directly or partitioned.
    ///
    /// Partition files are written under `out_path` (`<out_path>_<name>`,
    /// plus `_p` for prefix-form copies) and left on disk. An empty rule set
    /// reports zero metrics without calling the engine.
    pub fn run(
        &self,
        rule_set_path: &Path,
        trace_path: &Path,
        out_path: &Path,
        strategy: Strategy,
        tolerance_us: f64,
    ) -> Result<FullVolumeReport> {
        let rules = RuleSet::load(rule_set_path)?;
        if rules.is_empty() {
            log::info!("{:?} has no rules, nothing to build", rule_set_path);
            return Ok(FullVolumeReport {
                strategy,
                estimated_us: 0.0,
                tolerance_us,
                partitioned: false,
                partitions: Vec::new(),
                totals: BuildMetrics::zero(),
            });
        }

        let estimated_us = self.engine.estimate(rule_set_path)?;
        log::info!(
            "estimated build time for {:?}: {}us (tolerance {}us)",
            rule_set_path,
            estimated_us,
            tolerance_us
        );

        if estimated_us <= tolerance_us {
            let totals = self
                .engine
                .build(EngineMode::Range, rule_set_path, trace_path)?;
            log::info!("built {:?} directly", rule_set_path);
            return Ok(FullVolumeReport {
                strategy,
                estimated_us,
                tolerance_us,
                partitioned: false,
                partitions: Vec::new(),
                totals,
            });
        }

        let partitions = self.build_partitioned(rules, trace_path, out_path, strategy)?;
        let totals: BuildMetrics = partitions.iter().map(|p| p.metrics).sum();
        log::info!(
            "{} partitions built with {}: build {:?}us, search {:?}us",
            partitions.len(),
            strategy,
            totals.build_time_us,
            totals.search_time_us
        );

        Ok(FullVolumeReport {
            strategy,
            estimated_us,
            tolerance_us,
            partitioned: true,
            partitions,
            totals,
        })
    }

    /// Group, shard, persist and build `rules` partition by partition.
    ///
    /// Untagged input is tagged with sequential ids first, since the engine
    /// reads priorities from the id field.
    pub fn build_partitioned(
        &self,
        rules: RuleSet,
        trace_path: &Path,
        out_path: &Path,
        strategy: Strategy,
    ) -> Result<Vec<PartitionReport>> {
        let rules = if rules.is_tagged() || rules.is_empty() {
            rules
        } else {
            log::debug!("tagging {} rules before partitioning", rules.len());
            rules.tagged(1)
        };

        let mut rng = match self.config.shuffle_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let partitions = RuleGrouper::from_config(&self.config).partition(&rules, &mut rng);
        let jobs = self.write_jobs(&partitions, out_path, strategy)?;

        if self.config.parallel_builds {
            self.dispatch_parallel(jobs, trace_path)
        } else {
            jobs.into_iter()
                .map(|job| self.dispatch(job, trace_path))
                .collect()
        }
    }

    /// Persist every partition, plus a prefix-form copy where the strategy
    /// asks for prefix mode. All files exist before any build is issued.
    fn write_jobs(
        &self,
        partitions: &Partitions,
        out_path: &Path,
        strategy: Strategy,
    ) -> Result<Vec<BuildJob>> {
        let written = persist(partitions, out_path)?;
        let mut jobs = Vec::with_capacity(written.len());

        for (id, path) in written {
            let set = &partitions[&id];
            let mode = strategy.mode_for(id.category);
            let path = match mode {
                EngineMode::Prefix if !set.is_empty() => {
                    let prefix_path = suffixed(&path, "p");
                    let prefix_rules = to_prefix_rules(set, self.config.prefix_ids);
                    save_prefix_rules(&prefix_path, &prefix_rules)?;
                    prefix_path
                }
                _ => path,
            };
            jobs.push(BuildJob {
                id,
                rules: set.len(),
                path,
                mode,
            });
        }

        Ok(jobs)
    }

    fn dispatch(&self, job: BuildJob, trace_path: &Path) -> Result<PartitionReport> {
        let metrics = if job.rules == 0 {
            BuildMetrics::zero()
        } else {
            log::debug!("building {} ({} rules, {} mode)", job.id, job.rules, job.mode);
            self.engine.build(job.mode, &job.path, trace_path)?
        };

        Ok(PartitionReport {
            id: job.id,
            name: job.id.name(),
            rules: job.rules,
            path: job.path,
            mode: job.mode,
            metrics,
        })
    }

    /// Build every job on its own thread. Results are summed afterwards, so
    /// completion order does not matter; the report is sorted by partition.
    fn dispatch_parallel(
        &self,
        jobs: Vec<BuildJob>,
        trace_path: &Path,
    ) -> Result<Vec<PartitionReport>> {
        let results = Mutex::new(Vec::with_capacity(jobs.len()));

        std::thread::scope(|scope| {
            for job in jobs {
                let results = &results;
                scope.spawn(move || {
                    let report = self.dispatch(job, trace_path);
                    results.lock().push(report);
                });
            }
        });

        let mut reports = results
            .into_inner()
            .into_iter()
            .collect::<Result<Vec<_>>>()?;
        reports.sort_by_key(|r| r.id);
        Ok(reports)
    }
}
