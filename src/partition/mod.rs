//! Grouping rule sets into categories and bounded shards.

mod id;

pub use id::PartitionId;

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::category::Category;
use crate::rule::RuleSet;
use crate::{Config, Result};

/// Partitions keyed by id, iterated in category then shard order.
pub type Partitions = BTreeMap<PartitionId, RuleSet>;

/// Split `rules` into the four categories, keeping input order in each.
///
/// All four categories are present in the result, possibly empty.
pub fn group(rules: &RuleSet, threshold: f64) -> Partitions {
    let mut partitions: Partitions = Category::ALL
        .iter()
        .map(|&c| (PartitionId::whole(c), RuleSet::new()))
        .collect();

    for rule in rules {
        let id = PartitionId::whole(Category::classify(rule, threshold));
        if let Some(set) = partitions.get_mut(&id) {
            set.push(*rule);
        }
    }

    partitions
}

/// Number of shards needed for `n` rules: at least `shard_count`, and enough
/// that no shard (including the last, which takes the remainder) exceeds
/// `max_block_size`.
///
/// Never more than `n`: a `shard_count` above the rule count yields one rule
/// per shard rather than empty shards.
pub fn shard_count_for(n: usize, max_block_size: usize, shard_count: usize) -> usize {
    if n == 0 {
        return 1;
    }
    let max_block_size = max_block_size.max(1);
    let mut shards = shard_count.max(n.div_ceil(max_block_size)).clamp(1, n);
    while shards < n && n - (shards - 1) * (n / shards) > max_block_size {
        shards += 1;
    }
    shards
}

/// Half-open index ranges of `shards` near-equal shards over `n` items.
///
/// Shard `i` covers `[i * len, (i + 1) * len)` with `len = n / shards`; the
/// last shard runs to `n`.
pub fn shard_bounds(n: usize, shards: usize) -> Vec<Range<usize>> {
    let shards = shards.max(1);
    let len = n / shards;
    (0..shards)
        .map(|i| {
            let start = i * len;
            let end = if i + 1 == shards { n } else { start + len };
            start..end
        })
        .collect()
}

/// Shard every partition larger than `max_block_size`.
///
/// Oversized partitions are shuffled before splitting, so rule order inside a
/// shard no longer follows priority; each shard keeps the original ids and is
/// treated as an independent rule set downstream. Partitions within the bound
/// pass through unchanged.
pub fn rebalance<R: Rng + ?Sized>(
    partitions: Partitions,
    max_block_size: usize,
    shard_count: usize,
    rng: &mut R,
) -> Partitions {
    let mut out = Partitions::new();

    for (id, set) in partitions {
        if set.len() <= max_block_size {
            out.insert(id, set);
            continue;
        }

        let n = set.len();
        let shards = shard_count_for(n, max_block_size, shard_count);
        log::debug!("sharding {} ({} rules) into {} shards", id, n, shards);

        let mut rules = set.into_rules();
        rules.shuffle(rng);
        for (index, range) in shard_bounds(n, shards).into_iter().enumerate() {
            out.insert(
                PartitionId::shard(id.category, index),
                RuleSet::from_rules(rules[range].to_vec()),
            );
        }
    }

    out
}

/// Write each partition to `<out_path>_<name>`, empty ones included.
///
/// Returns the written paths in partition order.
pub fn persist(partitions: &Partitions, out_path: &Path) -> Result<Vec<(PartitionId, PathBuf)>> {
    let mut written = Vec::with_capacity(partitions.len());
    for (id, set) in partitions {
        let path = id.path(out_path);
        set.save(&path)?;
        written.push((*id, path));
    }
    Ok(written)
}

/// Sharding bounds for [`RuleGrouper`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rebalance {
    pub max_block_size: usize,
    pub shard_count: usize,
}

/// Groups a rule set by category, with optional sharding of large categories.
#[derive(Debug, Clone)]
pub struct RuleGrouper {
    threshold: f64,
    rebalance: Option<Rebalance>,
}

impl RuleGrouper {
    /// Grouping only, no sharding.
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            rebalance: None,
        }
    }

    pub fn with_rebalance(mut self, max_block_size: usize, shard_count: usize) -> Self {
        self.rebalance = Some(Rebalance {
            max_block_size,
            shard_count,
        });
        self
    }

    /// Grouper with the threshold and sharding bounds from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.category_threshold)
            .with_rebalance(config.max_rules_per_set, config.shard_count)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn partition<R: Rng + ?Sized>(&self, rules: &RuleSet, rng: &mut R) -> Partitions {
        let groups = group(rules, self.threshold);
        match self.rebalance {
            Some(r) => rebalance(groups, r.max_block_size, r.shard_count, rng),
            None => groups,
        }
    }
}
