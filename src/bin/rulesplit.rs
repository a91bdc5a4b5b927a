//! rulesplit: CLI for partitioned builds and incremental updates of
//! packet-classification rule sets.

use clap::{Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rulesplit::output::suffixed;
use rulesplit::partition::persist;
use rulesplit::rule::prefix::{load_prefix_rules, save_prefix_rules, to_prefix_rules, tuple_stats};
use rulesplit::trace::relabel;
use rulesplit::{
    Config, EngineMode, IdAssignment, ProcessEngine, ProcessTraceGenerator, RuleGrouper, RuleSet,
    Strategy, StrategyController, Trace, TraceGenerator, UpdateController,
};
use serde::Serialize;
use std::path::{Path, PathBuf};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "rulesplit")]
#[command(author = "Kaitu.io")]
#[command(version = "0.1.0")]
#[command(about = "Partition packet-classification rule sets and drive build/update strategies", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Range,
    Prefix,
}

impl From<ModeArg> for EngineMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Range => EngineMode::Range,
            ModeArg::Prefix => EngineMode::Prefix,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum IdsArg {
    Fresh,
    Inherit,
}

impl From<IdsArg> for IdAssignment {
    fn from(ids: IdsArg) -> Self {
        match ids {
            IdsArg::Fresh => IdAssignment::Fresh,
            IdsArg::Inherit => IdAssignment::Inherit,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate, then build a rule set directly or partitioned
    Full {
        /// Range rule file
        #[arg(short, long)]
        rules: PathBuf,

        /// Trace file (generated from the rules when omitted)
        #[arg(short, long)]
        trace: Option<PathBuf>,

        /// Prefix for partition files (defaults to the rule file)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Strategy: 1 classify-speed-first, 2 hybrid, 3 update-speed-first
        #[arg(short, long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(1..=3))]
        strategy: u8,

        /// Build-time tolerance in microseconds (overrides the config)
        #[arg(long)]
        tolerance: Option<f64>,
    },

    /// Apply a delta rule set to a base under an update strategy
    Incremental {
        /// Base rule file
        #[arg(short, long)]
        base: PathBuf,

        /// Delta rule file
        #[arg(short, long)]
        delta: PathBuf,

        /// Prefix for the combined, base, delta and partition files
        #[arg(short, long)]
        out: PathBuf,

        /// Strategy: 1 classify-speed-first, 2 hybrid, 3 update-speed-first
        #[arg(short, long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(1..=3))]
        strategy: u8,
    },

    /// Run the engine's own incremental update
    NativeUpdate {
        #[arg(short, long)]
        base: PathBuf,

        #[arg(short, long)]
        delta: PathBuf,

        #[arg(short, long)]
        out: PathBuf,

        #[arg(short, long, value_enum, default_value = "range")]
        mode: ModeArg,
    },

    /// Group (and shard) a rule set into partition files without building
    Group {
        #[arg(short, long)]
        rules: PathBuf,

        /// Prefix for partition files (defaults to the rule file)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Skip sharding of oversized categories
        #[arg(long)]
        no_rebalance: bool,
    },

    /// Convert a range rule file to prefix form
    Range2prefix {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Id assignment for the prefix output (overrides the config)
        #[arg(long, value_enum)]
        ids: Option<IdsArg>,
    },

    /// Tag every rule with sequential ids
    AddId {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// First id
        #[arg(long, default_value_t = 1)]
        start: u32,
    },

    /// Strip the id field from every rule
    RemoveId {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Sample a base/delta pair, written to `<input>_orgnl` and `<input>_updt`
    Split {
        #[arg(short, long)]
        input: PathBuf,

        /// Each rule goes to the delta with probability 1/N
        #[arg(long, default_value_t = 11)]
        one_in: u32,

        /// RNG seed (defaults to the config's shuffle seed)
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Rewrite trace labels to the first matching rule
    Relabel {
        #[arg(short, long)]
        rules: PathBuf,

        #[arg(short, long)]
        trace: PathBuf,

        /// Output trace (defaults to rewriting in place)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Count distinct prefix-length tuples in a prefix rule file
    TupleStats {
        #[arg(short, long)]
        input: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> CliResult<()> {
    let config = load_config(cli.config.as_deref())?;
    let json = cli.json;

    match cli.command {
        Commands::Full {
            rules,
            trace,
            out,
            strategy,
            tolerance,
        } => {
            let strategy = Strategy::try_from(strategy)?;
            let trace = match trace {
                Some(trace) => trace,
                None => ProcessTraceGenerator::from_config(&config).generate(&rules)?,
            };
            let out = out.unwrap_or_else(|| rules.clone());
            let tolerance = tolerance.unwrap_or(config.tolerance_us);

            let engine = ProcessEngine::from_config(&config);
            let report = StrategyController::new(config, engine)
                .run(&rules, &trace, &out, strategy, tolerance)?;

            if json {
                return print_json(&report);
            }
            println!(
                "{}: estimated {}us, {}",
                report.strategy,
                report.estimated_us,
                if report.partitioned {
                    "partitioned"
                } else {
                    "built directly"
                }
            );
            for p in &report.partitions {
                println!(
                    "  {:<6} {:>7} rules  {:<6}  build {:?}us  search {:?}us",
                    p.name, p.rules, p.mode, p.metrics.build_time_us, p.metrics.search_time_us
                );
            }
            println!(
                "Total: build {:?}us, search {:?}us",
                report.totals.build_time_us, report.totals.search_time_us
            );
        }

        Commands::Incremental {
            base,
            delta,
            out,
            strategy,
        } => {
            let strategy = Strategy::try_from(strategy)?;
            let controller = UpdateController::new(
                config.clone(),
                ProcessEngine::from_config(&config),
                ProcessTraceGenerator::from_config(&config),
            );
            let report = controller.run(&base, &delta, &out, strategy)?;

            if json {
                return print_json(&report);
            }
            println!(
                "{} ({:?}): {} base + {} delta rules",
                strategy, report.plan, report.base_rules, report.delta_rules
            );
            println!(
                "Update {}us, search {}us",
                report.update_time_us, report.search_time_us
            );
        }

        Commands::NativeUpdate {
            base,
            delta,
            out,
            mode,
        } => {
            let controller = UpdateController::new(
                config.clone(),
                ProcessEngine::from_config(&config),
                ProcessTraceGenerator::from_config(&config),
            );
            let report = controller.native_update(&base, &delta, &out, mode.into())?;

            if json {
                return print_json(&report);
            }
            println!(
                "Native update: {} base + {} delta rules, update {}us, search {}us",
                report.base_rules, report.delta_rules, report.update_time_us, report.search_time_us
            );
        }

        Commands::Group {
            rules,
            out,
            no_rebalance,
        } => {
            let set = RuleSet::load(&rules)?;
            let set = if set.is_tagged() { set } else { set.tagged(1) };
            let grouper = if no_rebalance {
                RuleGrouper::new(config.category_threshold)
            } else {
                RuleGrouper::from_config(&config)
            };

            let mut rng = seeded_rng(config.shuffle_seed);
            let partitions = grouper.partition(&set, &mut rng);
            let out = out.unwrap_or(rules);
            let written = persist(&partitions, &out)?;

            let summary: Vec<GroupEntry> = written
                .into_iter()
                .map(|(id, path)| GroupEntry {
                    name: id.name(),
                    rules: partitions[&id].len(),
                    path,
                })
                .collect();
            if json {
                return print_json(&summary);
            }
            for entry in &summary {
                println!("{:<6} {:>7} rules  {:?}", entry.name, entry.rules, entry.path);
            }
        }

        Commands::Range2prefix { input, output, ids } => {
            let set = RuleSet::load(&input)?;
            let ids = ids.map(IdAssignment::from).unwrap_or(config.prefix_ids);
            let prefix_rules = to_prefix_rules(&set, ids);
            save_prefix_rules(&output, &prefix_rules)?;
            println!(
                "Converted {} range rules to {} prefix rules: {:?}",
                set.len(),
                prefix_rules.len(),
                output
            );
        }

        Commands::AddId {
            input,
            output,
            start,
        } => {
            let set = RuleSet::load(&input)?.untagged().tagged(start);
            set.save(&output)?;
            println!("Tagged {} rules starting at {}: {:?}", set.len(), start, output);
        }

        Commands::RemoveId { input, output } => {
            let set = RuleSet::load(&input)?.untagged();
            set.save(&output)?;
            println!("Stripped ids from {} rules: {:?}", set.len(), output);
        }

        Commands::Split {
            input,
            one_in,
            seed,
        } => {
            let set = RuleSet::load(&input)?;
            let mut rng = seeded_rng(seed.or(config.shuffle_seed));
            let (base, delta) = set.split_for_update(&mut rng, one_in);

            let base_path = suffixed(&input, "orgnl");
            let delta_path = suffixed(&input, "updt");
            base.save(&base_path)?;
            delta.save(&delta_path)?;
            println!(
                "Split {} rules: {} base {:?}, {} delta {:?}",
                set.len(),
                base.len(),
                base_path,
                delta.len(),
                delta_path
            );
        }

        Commands::Relabel {
            rules,
            trace,
            output,
        } => {
            let set = RuleSet::load(&rules)?;
            let mut packets = Trace::load(&trace)?;
            let changed = relabel(&set, &mut packets);
            let output = output.unwrap_or(trace);
            packets.save(&output)?;
            println!(
                "Relabeled {} of {} packets: {:?}",
                changed,
                packets.len(),
                output
            );
        }

        Commands::TupleStats { input } => {
            let rules = load_prefix_rules(&input)?;
            let tuples = tuple_stats(&rules);
            if json {
                return print_json(&tuples);
            }
            println!("{} rules, {} distinct tuples", rules.len(), tuples.len());
            for (s, d, sp, dp) in tuples {
                println!("  {}, {}, {}, {}", s, d, sp, dp);
            }
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct GroupEntry {
    name: String,
    rules: usize,
    path: PathBuf,
}

fn load_config(path: Option<&Path>) -> CliResult<Config> {
    let config = match path {
        Some(path) => Config::from_yaml_file(path)?,
        None => Config::default(),
    };
    config.validate()?;
    Ok(config)
}

fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
