//! Partition naming.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::category::Category;
use crate::output::suffixed;

/// Identifies one partition: a category, optionally narrowed to a shard.
///
/// The on-disk name is `<category>` or `<category>_<shard>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionId {
    pub category: Category,
    pub shard: Option<usize>,
}

impl PartitionId {
    /// A whole, unsharded category.
    pub fn whole(category: Category) -> Self {
        Self {
            category,
            shard: None,
        }
    }

    pub fn shard(category: Category, index: usize) -> Self {
        Self {
            category,
            shard: Some(index),
        }
    }

    pub fn name(&self) -> String {
        match self.shard {
            Some(index) => format!("{}_{}", self.category, index),
            None => self.category.to_string(),
        }
    }

    /// File path of this partition under `out_path`: `<out_path>_<name>`.
    pub fn path(&self, out_path: &Path) -> PathBuf {
        suffixed(out_path, &self.name())
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}
