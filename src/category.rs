//! Breadth categories for rules.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::rule::Rule;

/// Default fraction of the address space that separates "small" from "large".
pub const DEFAULT_THRESHOLD: f64 = 0.1;

/// Size of the full IPv4 address space.
const FULL_SPACE: f64 = 4_294_967_296.0;

/// Category of a rule by the breadth of its source and destination ranges.
///
/// The first letter describes the source, the second the destination:
/// `s` = small (below the threshold), `l` = large.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Ss,
    Sl,
    Ls,
    Ll,
}

impl Category {
    /// All categories in partition order.
    pub const ALL: [Category; 4] = [Category::Ss, Category::Sl, Category::Ls, Category::Ll];

    /// Categorise by address fractions. A fraction equal to the threshold
    /// counts as large.
    pub fn from_fractions(src_frac: f64, dst_frac: f64, threshold: f64) -> Self {
        match (src_frac >= threshold, dst_frac >= threshold) {
            (false, false) => Category::Ss,
            (false, true) => Category::Sl,
            (true, false) => Category::Ls,
            (true, true) => Category::Ll,
        }
    }

    /// Categorise a rule.
    pub fn classify(rule: &Rule, threshold: f64) -> Self {
        let src_frac = rule.src.span() as f64 / FULL_SPACE;
        let dst_frac = rule.dst.span() as f64 / FULL_SPACE;
        Self::from_fractions(src_frac, dst_frac, threshold)
    }

    /// True for the mixed categories (`sl`, `ls`).
    pub fn is_mixed(&self) -> bool {
        matches!(self, Category::Sl | Category::Ls)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Ss => "ss",
            Category::Sl => "sl",
            Category::Ls => "ls",
            Category::Ll => "ll",
        }
    }
}

/// Categorise a rule against `threshold`.
pub fn classify(rule: &Rule, threshold: f64) -> Category {
    Category::classify(rule, threshold)
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ss" => Ok(Category::Ss),
            "sl" => Ok(Category::Sl),
            "ls" => Ok(Category::Ls),
            "ll" => Ok(Category::Ll),
            _ => Err(()),
        }
    }
}
