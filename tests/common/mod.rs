//! Stub collaborators shared by the integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use rulesplit::output::suffixed;
use rulesplit::{
    BuildMetrics, ClassificationEngine, EngineMode, Error, Packet, Result, Rule, RuleSet, Trace,
    TraceGenerator,
};
use std::fs;
use std::path::{Path, PathBuf};

/// Search time the stub engine reports for every build or update.
pub const STUB_SEARCH_US: f64 = 10.0;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Estimate(PathBuf),
    Build {
        mode: EngineMode,
        rules: PathBuf,
        trace: PathBuf,
    },
    Update {
        mode: EngineMode,
        base: PathBuf,
        delta: PathBuf,
        trace: PathBuf,
    },
}

/// Engine that records every call and derives metrics from file sizes:
/// build and update time are the rule line count, search time is fixed.
pub struct StubEngine {
    pub estimate_us: f64,
    /// Fail any build whose rule path contains this text
    pub fail_on: Option<String>,
    calls: Mutex<Vec<Call>>,
}

impl StubEngine {
    pub fn new(estimate_us: f64) -> Self {
        Self {
            estimate_us,
            fail_on: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(mut self, pattern: &str) -> Self {
        self.fail_on = Some(pattern.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn builds(&self) -> Vec<(EngineMode, PathBuf)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Build { mode, rules, .. } => Some((mode, rules)),
                _ => None,
            })
            .collect()
    }

    pub fn estimates(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Estimate(_)))
            .count()
    }
}

fn line_count(path: &Path) -> Result<usize> {
    let text = fs::read_to_string(path).map_err(Error::Io)?;
    Ok(text.lines().filter(|l| !l.trim().is_empty()).count())
}

impl ClassificationEngine for StubEngine {
    fn estimate(&self, rules: &Path) -> Result<f64> {
        self.calls.lock().push(Call::Estimate(rules.to_path_buf()));
        line_count(rules)?;
        Ok(self.estimate_us)
    }

    fn build(&self, mode: EngineMode, rules: &Path, trace: &Path) -> Result<BuildMetrics> {
        self.calls.lock().push(Call::Build {
            mode,
            rules: rules.to_path_buf(),
            trace: trace.to_path_buf(),
        });

        if let Some(pattern) = &self.fail_on {
            if rules.to_string_lossy().contains(pattern.as_str()) {
                return Err(Error::EngineFailure {
                    program: "stub".to_string(),
                    status: Some(1),
                    stderr: format!("refusing {:?}", rules),
                });
            }
        }

        let lines = line_count(rules)?;
        Ok(BuildMetrics {
            build_time_us: Some(lines as f64),
            search_time_us: Some(STUB_SEARCH_US),
            update_time_us: None,
            packets_loaded: Some(lines as u64),
        })
    }

    fn update(
        &self,
        mode: EngineMode,
        base: &Path,
        delta: &Path,
        trace: &Path,
    ) -> Result<BuildMetrics> {
        self.calls.lock().push(Call::Update {
            mode,
            base: base.to_path_buf(),
            delta: delta.to_path_buf(),
            trace: trace.to_path_buf(),
        });

        line_count(base)?;
        let lines = line_count(delta)?;
        Ok(BuildMetrics {
            build_time_us: None,
            search_time_us: Some(STUB_SEARCH_US),
            update_time_us: Some(lines as f64),
            packets_loaded: None,
        })
    }
}

/// Trace generator writing one packet per rule, labeled with the rule's
/// 1-based line number, to `<rules>_trace`.
#[derive(Default)]
pub struct StubTraceGenerator {
    /// Rule file and whether it carried ids, per call
    calls: Mutex<Vec<(PathBuf, bool)>>,
}

impl StubTraceGenerator {
    pub fn calls(&self) -> Vec<(PathBuf, bool)> {
        self.calls.lock().clone()
    }
}

impl TraceGenerator for StubTraceGenerator {
    fn generate(&self, rules: &Path) -> Result<PathBuf> {
        let set = RuleSet::load(rules)?;
        self.calls
            .lock()
            .push((rules.to_path_buf(), set.is_tagged()));

        let packets = set
            .iter()
            .zip(1..)
            .map(|(r, label)| {
                Packet::new(
                    r.src.lo,
                    r.dst.lo,
                    r.src_port.lo,
                    r.dst_port.lo,
                    r.protocol.value,
                    label,
                )
            })
            .collect();

        let path = suffixed(rules, "trace");
        Trace::new(packets).save(&path)?;
        Ok(path)
    }
}

/// A TCP rule with full port ranges between two address fields.
pub fn rule(src: &str, dst: &str) -> Rule {
    format!("@{} {} 0 : 65535 0 : 65535 0x06/0xFF", src, dst)
        .parse()
        .unwrap()
}

/// A distinct `/24` for index `i`.
pub fn small_net(i: usize) -> String {
    format!("10.{}.{}.0/24", (i / 256) % 256, i % 256)
}

/// `n` rules of each category (small = `/24`, large = `/0`), in the order
/// `ss`, `sl`, `ls`, `ll`.
pub fn mixed_rules(n: usize) -> RuleSet {
    let mut rules = Vec::with_capacity(4 * n);
    rules.extend((0..n).map(|i| rule(&small_net(i), &small_net(i + 1))));
    rules.extend((0..n).map(|i| rule(&small_net(i), "0.0.0.0/0")));
    rules.extend((0..n).map(|i| rule("0.0.0.0/0", &small_net(i))));
    rules.extend((0..n).map(|_| rule("0.0.0.0/0", "0.0.0.0/0")));
    RuleSet::from_rules(rules)
}

/// `n` distinct `ss` rules.
pub fn small_rules(n: usize) -> RuleSet {
    (0..n).map(|i| rule(&small_net(i), &small_net(i + 7))).collect()
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
