//! nodelabel CLI — driving adapter for the nodelabel rule engine.
//!
//! Subcommands:
//! - `label <rules> --features <snapshot>` — print the labels a snapshot produces
//! - `check <rules>` — decode rules and compile their expressions and templates
//! - `info` — print match operators and legacy sub-rule kinds
//!
//! Logging goes to stderr. `-v` raises the default level (info, debug,
//! trace); `RUST_LOG` overrides it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nodelabel::{Features, Labeler, Labels, LegacyMatcher, MatchOp, RuleSet};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "nodelabel")]
#[command(about = "Derive node labels from discovered features", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Evaluate rules against a feature snapshot and print the labels
    Label {
        /// Rule file (YAML, or JSON with a .json extension)
        rules: PathBuf,

        /// Feature snapshot file
        #[arg(short, long)]
        features: PathBuf,

        /// Drop-in directory with additional rule files
        #[arg(long)]
        rules_dir: Vec<PathBuf>,

        /// Leave out the built-in rdma rules
        #[arg(long)]
        no_builtin: bool,

        /// Evaluate rules on worker threads
        #[arg(long)]
        parallel: bool,

        /// Print labels as a JSON object
        #[arg(long)]
        json: bool,
    },

    /// Validate a rule file
    Check {
        /// Rule file (YAML, or JSON with a .json extension)
        rules: PathBuf,
    },

    /// Print supported operators and legacy sub-rules
    Info,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Label {
            rules,
            features,
            rules_dir,
            no_builtin,
            parallel,
            json,
        } => {
            let labels = cmd_label(&rules, &features, &rules_dir, !no_builtin, parallel)?;
            print!("{}", render(&labels, json)?);
        }
        Command::Check { rules } => {
            let count = cmd_check(&rules)?;
            println!("Rules valid ({count} rules)");
        }
        Command::Info => print!("{}", info_text()),
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ═══════════════════════════════════════════════════════════════════════════════
// Commands
// ═══════════════════════════════════════════════════════════════════════════════

fn cmd_label(
    rules: &Path,
    features: &Path,
    dirs: &[PathBuf],
    builtin: bool,
    parallel: bool,
) -> Result<Labels> {
    let labeler = build_labeler(rules, dirs, builtin)?;
    let snapshot = Features::load(features)
        .with_context(|| format!("failed to load features from {}", features.display()))?;
    info!(
        rules = labeler.rules().len(),
        domains = snapshot.len(),
        "evaluating"
    );

    Ok(if parallel {
        labeler.labels_parallel(&snapshot)
    } else {
        labeler.labels(&snapshot)
    })
}

fn cmd_check(rules: &Path) -> Result<usize> {
    let set = RuleSet::load_file(rules)
        .with_context(|| format!("config invalid: {}", rules.display()))?;
    for rule in &set {
        debug!(
            rule = rule.name(),
            dialect = if rule.is_legacy() { "legacy" } else { "modern" },
            "decoded"
        );
    }
    Ok(set.len())
}

fn info_text() -> String {
    let mut out = String::from("Match operators:\n");
    for op in MatchOp::ALL {
        out.push_str(&format!("  {op}\n"));
    }
    out.push_str("\nLegacy sub-rules:\n");
    for kind in LegacyMatcher::KINDS {
        out.push_str(&format!("  {kind}\n"));
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// Labeler assembly (composition root)
// ═══════════════════════════════════════════════════════════════════════════════

fn build_labeler(rules: &Path, dirs: &[PathBuf], builtin: bool) -> Result<Labeler> {
    let set = RuleSet::load_file(rules)
        .with_context(|| format!("failed to load rules from {}", rules.display()))?;

    let mut builder = Labeler::builder().builtin_rules(builtin).rules(set);
    for dir in dirs {
        builder = builder.rules_dir(dir);
    }
    builder.build().context("failed to load drop-in rules")
}

// ═══════════════════════════════════════════════════════════════════════════════
// Output
// ═══════════════════════════════════════════════════════════════════════════════

fn render(labels: &Labels, json: bool) -> Result<String> {
    if json {
        let mut out = serde_json::to_string_pretty(labels)?;
        out.push('\n');
        return Ok(out);
    }
    Ok(labels.iter().map(|(k, v)| format!("{k}={v}\n")).collect())
}
