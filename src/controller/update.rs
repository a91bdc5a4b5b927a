//! Incremental update controller.
//!
//! Every update strategy starts from the same prepared inputs: base and
//! delta with their ids stripped, concatenated delta-after-base, one trace
//! generated against that combined set, and sequential ids re-applied so the
//! trace labels line up with base ids `1..=B` and delta ids `B+1..=B+D`.

use serde::Serialize;
use std::path::{Path, PathBuf};

use super::{FullVolumeReport, StrategyController, Strategy};
use crate::engine::{BuildMetrics, ClassificationEngine, EngineMode};
use crate::output::suffixed;
use crate::rule::prefix::{save_prefix_rules, to_prefix_rules};
use crate::rule::RuleSet;
use crate::trace::TraceGenerator;
use crate::{Config, Result};

/// Delta size at which the hybrid strategy stops building the delta
/// directly and partitions it instead.
///
/// Fixed; it is not scaled with the size of the base.
pub const HYBRID_DELTA_LIMIT: usize = 5000;

/// The path an update took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdatePlan {
    /// Empty delta: nothing built
    NoOp,
    /// Delta built alone in prefix mode
    PrefixDelta,
    /// Combined set rebuilt through the partition pipeline
    FullRebuild,
    /// Delta built alone in range mode
    IndependentDelta,
    /// Delta built through the partition pipeline
    PartitionedDelta,
    /// Engine's own incremental update
    Native,
}

/// Files produced by the shared update pre-step.
#[derive(Debug, Clone)]
pub struct PreparedUpdate {
    /// Combined base + delta, tagged `1..=B+D`
    pub combined: PathBuf,
    /// Base, tagged `1..=B`
    pub base: PathBuf,
    /// Delta, tagged `B+1..=B+D`
    pub delta: PathBuf,
    /// Trace generated against the combined set
    pub trace: PathBuf,
    pub base_set: RuleSet,
    pub delta_set: RuleSet,
}

/// Result of an update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateReport {
    /// `None` for the engine's native update
    pub strategy: Option<Strategy>,
    pub plan: UpdatePlan,
    pub base_rules: usize,
    pub delta_rules: usize,
    pub update_time_us: f64,
    /// Total search time over every structure the update left behind
    pub search_time_us: f64,
    pub packets_loaded: Option<u64>,
    pub combined_path: Option<PathBuf>,
    pub trace_path: Option<PathBuf>,
    /// Inner full-volume report when the update went through the partition pipeline
    pub full_volume: Option<FullVolumeReport>,
}

impl UpdateReport {
    fn no_op(strategy: Option<Strategy>, base_rules: usize) -> Self {
        Self {
            strategy,
            plan: UpdatePlan::NoOp,
            base_rules,
            delta_rules: 0,
            update_time_us: 0.0,
            search_time_us: 0.0,
            packets_loaded: None,
            combined_path: None,
            trace_path: None,
            full_volume: None,
        }
    }

    fn new(strategy: Option<Strategy>, plan: UpdatePlan, prepared: &PreparedUpdate) -> Self {
        Self {
            strategy,
            plan,
            base_rules: prepared.base_set.len(),
            delta_rules: prepared.delta_set.len(),
            update_time_us: 0.0,
            search_time_us: 0.0,
            packets_loaded: None,
            combined_path: Some(prepared.combined.clone()),
            trace_path: Some(prepared.trace.clone()),
            full_volume: None,
        }
    }
}

/// Applies a delta rule set to a base under one of the update strategies.
pub struct UpdateController<E, G> {
    config: Config,
    engine: E,
    traces: G,
}

impl<E: ClassificationEngine, G: TraceGenerator> UpdateController<E, G> {
    pub fn new(config: Config, engine: E, traces: G) -> Self {
        Self {
            config,
            engine,
            traces,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the update pre-step for two rule files.
    ///
    /// Writes `<out_path>_combined`, `<out_path>_base` and `<out_path>_delta`,
    /// and the generator's trace for the combined file.
    pub fn prepare(&self, base_path: &Path, delta_path: &Path, out_path: &Path) -> Result<PreparedUpdate> {
        let base = RuleSet::load(base_path)?;
        let delta = RuleSet::load(delta_path)?;
        self.prepare_sets(&base, &delta, out_path)
    }

    fn prepare_sets(&self, base: &RuleSet, delta: &RuleSet, out_path: &Path) -> Result<PreparedUpdate> {
        let combined_path = suffixed(out_path, "combined");
        let combined = base.untagged().concat(&delta.untagged());
        combined.save(&combined_path)?;

        let trace = self.traces.generate(&combined_path)?;
        log::info!(
            "generated trace {:?} for {} base + {} delta rules",
            trace,
            base.len(),
            delta.len()
        );

        combined.tagged(1).save(&combined_path)?;

        let base_set = base.untagged().tagged(1);
        let delta_set = delta.untagged().tagged(base.len() as u32 + 1);
        let base_path = suffixed(out_path, "base");
        let delta_path = suffixed(out_path, "delta");
        base_set.save(&base_path)?;
        delta_set.save(&delta_path)?;

        Ok(PreparedUpdate {
            combined: combined_path,
            base: base_path,
            delta: delta_path,
            trace,
            base_set,
            delta_set,
        })
    }

    /// Apply `delta_path` to `base_path` under `strategy`.
    ///
    /// An empty delta returns immediately with zero update time.
    pub fn run(
        &self,
        base_path: &Path,
        delta_path: &Path,
        out_path: &Path,
        strategy: Strategy,
    ) -> Result<UpdateReport> {
        let base = RuleSet::load(base_path)?;
        let delta = RuleSet::load(delta_path)?;
        if delta.is_empty() {
            log::info!("empty delta {:?}, nothing to update", delta_path);
            return Ok(UpdateReport::no_op(Some(strategy), base.len()));
        }

        let prepared = self.prepare_sets(&base, &delta, out_path)?;
        let report = match strategy {
            Strategy::UpdateSpeedFirst => self.prefix_delta(&prepared)?,
            Strategy::ClassifySpeedFirst => self.full_rebuild(&prepared)?,
            Strategy::Hybrid if prepared.delta_set.len() < HYBRID_DELTA_LIMIT => {
                self.independent_delta(&prepared)?
            }
            Strategy::Hybrid => self.partitioned_delta(&prepared)?,
        };

        log::info!(
            "{} update ({:?}): update {}us, search {}us",
            strategy,
            report.plan,
            report.update_time_us,
            report.search_time_us
        );
        Ok(report)
    }

    /// Run the engine's own incremental update (`-u`) on the prepared inputs.
    ///
    /// In prefix mode the base and delta are converted first.
    pub fn native_update(
        &self,
        base_path: &Path,
        delta_path: &Path,
        out_path: &Path,
        mode: EngineMode,
    ) -> Result<UpdateReport> {
        let base = RuleSet::load(base_path)?;
        let delta = RuleSet::load(delta_path)?;
        if delta.is_empty() {
            return Ok(UpdateReport::no_op(None, base.len()));
        }

        let prepared = self.prepare_sets(&base, &delta, out_path)?;
        let (base_file, delta_file) = match mode {
            EngineMode::Range => (prepared.base.clone(), prepared.delta.clone()),
            EngineMode::Prefix => (
                self.write_prefix(&prepared.base_set, &prepared.base)?,
                self.write_prefix(&prepared.delta_set, &prepared.delta)?,
            ),
        };

        let metrics = self
            .engine
            .update(mode, &base_file, &delta_file, &prepared.trace)?;

        let mut report = UpdateReport::new(None, UpdatePlan::Native, &prepared);
        report.update_time_us = metrics.update_time(&delta_file)?;
        report.search_time_us = metrics.search_time(&delta_file)?;
        report.packets_loaded = metrics.packets_loaded;
        Ok(report)
    }

    fn write_prefix(&self, set: &RuleSet, range_path: &Path) -> Result<PathBuf> {
        let path = suffixed(range_path, "p");
        save_prefix_rules(&path, &to_prefix_rules(set, self.config.prefix_ids))?;
        Ok(path)
    }

    /// Range build of the base. An empty base contributes a zero search
    /// baseline and is never sent to the engine.
    fn build_base(&self, prepared: &PreparedUpdate) -> Result<BuildMetrics> {
        if prepared.base_set.is_empty() {
            return Ok(BuildMetrics::zero());
        }
        self.engine
            .build(EngineMode::Range, &prepared.base, &prepared.trace)
    }

    /// Base in range mode for the search baseline; delta alone in prefix
    /// mode, its build time being the update time.
    fn prefix_delta(&self, prepared: &PreparedUpdate) -> Result<UpdateReport> {
        let base = self.build_base(prepared)?;
        let delta_file = self.write_prefix(&prepared.delta_set, &prepared.delta)?;
        let delta = self
            .engine
            .build(EngineMode::Prefix, &delta_file, &prepared.trace)?;

        let mut report = UpdateReport::new(
            Some(Strategy::UpdateSpeedFirst),
            UpdatePlan::PrefixDelta,
            prepared,
        );
        report.update_time_us = delta.build_time(&delta_file)?;
        report.search_time_us = base.search_time(&prepared.base)? + delta.search_time(&delta_file)?;
        report.packets_loaded = base.packets_loaded;
        Ok(report)
    }

    /// Rebuild the combined set through the partition pipeline under a tight
    /// tolerance; its total build time is the update time.
    fn full_rebuild(&self, prepared: &PreparedUpdate) -> Result<UpdateReport> {
        let controller = StrategyController::new(self.config.clone(), &self.engine);
        let inner = controller.run(
            &prepared.combined,
            &prepared.trace,
            &prepared.combined,
            Strategy::UpdateSpeedFirst,
            self.config.update_tolerance_us,
        )?;

        let mut report = UpdateReport::new(
            Some(Strategy::ClassifySpeedFirst),
            UpdatePlan::FullRebuild,
            prepared,
        );
        report.update_time_us = inner.totals.build_time(&prepared.combined)?;
        report.search_time_us = inner.totals.search_time(&prepared.combined)?;
        report.packets_loaded = inner.totals.packets_loaded;
        report.full_volume = Some(inner);
        Ok(report)
    }

    /// Small delta: base and delta built independently in range mode.
    fn independent_delta(&self, prepared: &PreparedUpdate) -> Result<UpdateReport> {
        let base = self.build_base(prepared)?;
        let delta = self
            .engine
            .build(EngineMode::Range, &prepared.delta, &prepared.trace)?;

        let mut report =
            UpdateReport::new(Some(Strategy::Hybrid), UpdatePlan::IndependentDelta, prepared);
        report.update_time_us = delta.build_time(&prepared.delta)?;
        report.search_time_us =
            base.search_time(&prepared.base)? + delta.search_time(&prepared.delta)?;
        report.packets_loaded = base.packets_loaded;
        Ok(report)
    }

    /// Large delta: the delta alone goes through the partition pipeline; its
    /// search time adds to the base's.
    fn partitioned_delta(&self, prepared: &PreparedUpdate) -> Result<UpdateReport> {
        let base = self.build_base(prepared)?;
        let controller = StrategyController::new(self.config.clone(), &self.engine);
        let inner = controller.run(
            &prepared.delta,
            &prepared.trace,
            &prepared.delta,
            Strategy::UpdateSpeedFirst,
            self.config.tolerance_us,
        )?;

        let mut report =
            UpdateReport::new(Some(Strategy::Hybrid), UpdatePlan::PartitionedDelta, prepared);
        report.update_time_us = inner.totals.build_time(&prepared.delta)?;
        report.search_time_us =
            base.search_time(&prepared.base)? + inner.totals.search_time(&prepared.delta)?;
        report.packets_loaded = base.packets_loaded;
        report.full_volume = Some(inner);
        Ok(report)
    }
}
