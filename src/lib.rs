//! rulesplit - Adaptive partitioning and build-strategy selection for
//! packet-classification rule sets.
//!
//! The crate sits in front of an external classification engine that builds
//! a matching structure from a 5-tuple rule file and searches it with a
//! labeled packet trace. Building one structure for a large rule set can be
//! slow, so rulesplit:
//!
//! - **Estimates** the build time first and builds directly when it fits a
//!   tolerance
//! - **Groups** rules into four categories (`ss`, `sl`, `ls`, `ll`) by how
//!   much of the source and destination address spaces they cover
//! - **Shards** categories that exceed a configured size
//! - **Converts** mixed categories to prefix form when the strategy asks for it
//! - **Builds** every partition on the engine and sums the reported metrics
//! - **Updates** an existing rule set with a delta under one of three
//!   strategies
//!
//! # Quick Start
//!
//! ```ignore
//! use rulesplit::{Config, ProcessEngine, Strategy, StrategyController};
//! use std::path::Path;
//!
//! let config = Config::from_yaml_file(Path::new("rulesplit.yaml"))?;
//! let engine = ProcessEngine::from_config(&config);
//! let controller = StrategyController::new(config.clone(), engine);
//!
//! let report = controller.run(
//!     Path::new("acl1_10k"),
//!     Path::new("acl1_10k_trace"),
//!     Path::new("out/acl1_10k"),
//!     Strategy::UpdateSpeedFirst,
//!     config.tolerance_us,
//! )?;
//! println!("total build {:?}us", report.totals.build_time_us);
//! ```
//!
//! # Rule Format
//!
//! Range rules, one per line:
//!
//! ```text
//! @<srcIP>/<len> <dstIP>/<len> <sLo> : <sHi> <dLo> : <dHi> 0x<proto>/0x<mask> [<id>]
//! ```
//!
//! Prefix rules, produced by [`rule::prefix`]:
//!
//! ```text
//! @<sip>/<len> <dip>/<len> <sport>/<len> <dport>/<len> 0x<proto>/0x<mask> <id>
//! ```

mod error;

pub mod category;
pub mod config;
pub mod controller;
pub mod engine;
pub mod output;
pub mod partition;
pub mod rule;
pub mod trace;

// Re-export core types
pub use error::{Error, FieldError, Result};
pub use config::{Config, TraceParams};

// Re-export rule model
pub use category::{classify, Category};
pub use rule::{decompose, IdAssignment, PrefixBlock, PrefixRule, Rule, RuleSet};
pub use trace::{Packet, ProcessTraceGenerator, Trace, TraceGenerator};

// Re-export partitioning
pub use partition::{PartitionId, Partitions, RuleGrouper};

// Re-export engine and controllers
pub use controller::{
    FullVolumeReport, PartitionReport, Strategy, StrategyController, UpdateController,
    UpdatePlan, UpdateReport,
};
pub use engine::{BuildMetrics, ClassificationEngine, EngineMode, ProcessEngine};
