//! Engine metric parsing.
//!
//! The engine reports results as `<MetricName>: <number>` lines on stdout.
//! This is the only place that knows those names.

use serde::{Deserialize, Serialize};
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::path::Path;

use crate::{Error, Result};

pub const BUILD_TIME: &str = "Time for building(us):";
pub const SEARCH_TIME: &str = "Time for searching(us):";
pub const UPDATE_TIME: &str = "Time for updating(us):";
pub const ESTIMATED_TIME: &str = "Estimated time:";
pub const PACKETS_LOADED: &str = "Packets loaded:";

/// Timings reported for one engine invocation, or a sum of several.
///
/// A metric the engine did not print is `None`, which is different from a
/// reported zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BuildMetrics {
    pub build_time_us: Option<f64>,
    pub search_time_us: Option<f64>,
    pub update_time_us: Option<f64>,
    pub packets_loaded: Option<u64>,
}

fn add_opt<T: Add<Output = T>>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a + b),
        (a, None) => a,
        (None, b) => b,
    }
}

fn required(value: Option<f64>, metric: &'static str, rules: &Path) -> Result<f64> {
    value.ok_or_else(|| Error::MissingMetric {
        metric,
        rules: rules.to_path_buf(),
    })
}

impl BuildMetrics {
    /// Metrics of a partition that needed no work.
    pub fn zero() -> Self {
        Self {
            build_time_us: Some(0.0),
            search_time_us: Some(0.0),
            update_time_us: Some(0.0),
            packets_loaded: Some(0),
        }
    }

    /// Build time, or `MissingMetric` naming the rule file it was for.
    pub fn build_time(&self, rules: &Path) -> Result<f64> {
        required(self.build_time_us, BUILD_TIME, rules)
    }

    pub fn search_time(&self, rules: &Path) -> Result<f64> {
        required(self.search_time_us, SEARCH_TIME, rules)
    }

    pub fn update_time(&self, rules: &Path) -> Result<f64> {
        required(self.update_time_us, UPDATE_TIME, rules)
    }
}

impl Add for BuildMetrics {
    type Output = BuildMetrics;

    fn add(self, other: BuildMetrics) -> BuildMetrics {
        BuildMetrics {
            build_time_us: add_opt(self.build_time_us, other.build_time_us),
            search_time_us: add_opt(self.search_time_us, other.search_time_us),
            update_time_us: add_opt(self.update_time_us, other.update_time_us),
            packets_loaded: add_opt(self.packets_loaded, other.packets_loaded),
        }
    }
}

impl AddAssign for BuildMetrics {
    fn add_assign(&mut self, other: BuildMetrics) {
        *self = *self + other;
    }
}

impl Sum for BuildMetrics {
    fn sum<I: Iterator<Item = BuildMetrics>>(iter: I) -> Self {
        iter.fold(BuildMetrics::default(), Add::add)
    }
}

impl<'a> Sum<&'a BuildMetrics> for BuildMetrics {
    fn sum<I: Iterator<Item = &'a BuildMetrics>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

/// Find the value of `name` in the engine output. The last occurrence wins.
///
/// Returns `Ok(None)` when no line carries the metric and an error when a
/// line carries it with a value that is not a number.
pub fn find_metric<S: AsRef<str>>(lines: &[S], name: &str) -> Result<Option<f64>> {
    let mut found = None;
    for line in lines {
        let Some(rest) = line.as_ref().trim_start().strip_prefix(name) else {
            continue;
        };
        let raw = rest.trim();
        let value = raw
            .parse::<f64>()
            .map_err(|_| Error::EngineOutput(format!("{} {:?}", name, raw)))?;
        found = Some(value);
    }
    Ok(found)
}

/// Parse the build, search, update and packet metrics from engine output.
pub fn parse_metrics<S: AsRef<str>>(lines: &[S]) -> Result<BuildMetrics> {
    let packets_loaded = match find_metric(lines, PACKETS_LOADED)? {
        Some(v) if v >= 0.0 && v.fract() == 0.0 => Some(v as u64),
        Some(v) => {
            return Err(Error::EngineOutput(format!("{} {}", PACKETS_LOADED, v)));
        }
        None => None,
    };

    Ok(BuildMetrics {
        build_time_us: find_metric(lines, BUILD_TIME)?,
        search_time_us: find_metric(lines, SEARCH_TIME)?,
        update_time_us: find_metric(lines, UPDATE_TIME)?,
        packets_loaded,
    })
}

/// Parse the estimated build time from estimator output.
pub fn parse_estimate<S: AsRef<str>>(lines: &[S]) -> Result<Option<f64>> {
    find_metric(lines, ESTIMATED_TIME)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OUTPUT: &str = "\
Loading rules from rules/fw1_10K
10000 rules loaded
Loading trace from traces/fw1_10K_trace
Packets loaded:100000
Time for building(us): 1388
Time for searching(us): 52000
";

    #[test]
    fn test_parse_metrics() {
        let lines: Vec<&str> = OUTPUT.lines().collect();
        let metrics = parse_metrics(&lines).unwrap();
        assert_eq!(metrics.build_time_us, Some(1388.0));
        assert_eq!(metrics.search_time_us, Some(52000.0));
        assert_eq!(metrics.update_time_us, None);
        assert_eq!(metrics.packets_loaded, Some(100000));
    }

    #[test]
    fn test_parse_estimate() {
        let lines = ["Estimated time:4521.500000 ", "Time for estimating(us): 12"];
        assert_eq!(parse_estimate(&lines).unwrap(), Some(4521.5));
        assert_eq!(parse_estimate(&["nothing here"]).unwrap(), None);
    }

    #[test]
    fn test_last_occurrence_wins() {
        let lines = ["Time for building(us): 1", "Time for building(us): 2"];
        assert_eq!(find_metric(&lines, BUILD_TIME).unwrap(), Some(2.0));
    }

    #[test]
    fn test_absent_is_not_zero() {
        let metrics = parse_metrics(&["Time for searching(us): 0"]).unwrap();
        assert_eq!(metrics.search_time_us, Some(0.0));
        assert_eq!(metrics.build_time_us, None);
        assert!(matches!(
            metrics.build_time(Path::new("r")),
            Err(Error::MissingMetric { metric: BUILD_TIME, .. })
        ));
    }

    #[test]
    fn test_unparseable_value() {
        let err = parse_metrics(&["Time for building(us): soon"]).unwrap_err();
        assert!(matches!(err, Error::EngineOutput(_)));
        assert!(err.is_engine_failure());
    }

    #[test]
    fn test_sum_is_additive() {
        let a = BuildMetrics {
            build_time_us: Some(10.0),
            search_time_us: Some(5.0),
            update_time_us: None,
            packets_loaded: Some(3),
        };
        let b = BuildMetrics {
            build_time_us: Some(1.0),
            search_time_us: Some(2.0),
            update_time_us: Some(4.0),
            packets_loaded: None,
        };

        let total: BuildMetrics = [a, b, BuildMetrics::zero()].iter().sum();
        assert_eq!(total.build_time_us, Some(11.0));
        assert_eq!(total.search_time_us, Some(7.0));
        assert_eq!(total.update_time_us, Some(4.0));
        assert_eq!(total.packets_loaded, Some(3));
        assert_eq!(a + b, b + a);
        assert_eq!(BuildMetrics::default() + a, a);
    }
}
