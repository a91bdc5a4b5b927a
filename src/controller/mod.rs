//! Build and update strategy controllers.

mod strategy;
mod update;

pub use strategy::{FullVolumeReport, PartitionReport, StrategyController};
pub use update::{PreparedUpdate, UpdateController, UpdatePlan, UpdateReport, HYBRID_DELTA_LIMIT};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::category::Category;
use crate::engine::EngineMode;
use crate::Error;

/// Policy used when a rule set is too expensive to build in one piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum Strategy {
    /// Every partition is built in range mode
    ClassifySpeedFirst = 1,
    /// Currently partitions like `UpdateSpeedFirst`
    Hybrid = 2,
    /// Mixed categories (`sl`, `ls`) are built in prefix mode
    UpdateSpeedFirst = 3,
}

impl Strategy {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Strategy::ClassifySpeedFirst),
            2 => Some(Strategy::Hybrid),
            3 => Some(Strategy::UpdateSpeedFirst),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::ClassifySpeedFirst => "classify-speed-first",
            Strategy::Hybrid => "hybrid",
            Strategy::UpdateSpeedFirst => "update-speed-first",
        }
    }

    /// Engine mode for a partition of `category` under this strategy.
    pub fn mode_for(&self, category: Category) -> EngineMode {
        match self {
            Strategy::ClassifySpeedFirst => EngineMode::Range,
            Strategy::Hybrid | Strategy::UpdateSpeedFirst if category.is_mixed() => {
                EngineMode::Prefix
            }
            Strategy::Hybrid | Strategy::UpdateSpeedFirst => EngineMode::Range,
        }
    }
}

impl TryFrom<u8> for Strategy {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        Strategy::from_u8(v).ok_or(Error::InvalidStrategy(v))
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
