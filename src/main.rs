//! Binary entry point for curator.
//!
//! This binary provides the CLI interface for the tag optimization
//! convergence engine.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr/print_stdout in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use clap::{Parser, Subcommand};
use curator::audit::AuditLog;
use curator::config::CuratorConfig;
use curator::models::PassResult;
use curator::oracle::CliOracle;
use curator::services::{ConvergenceController, PassExecutor, RuleOptimizer, RunSummary};
use curator::storage::{RuleStore, StateCounts, VocabularyStore};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Curator - vocabulary-governed tag curation for knowledge rules.
#[derive(Parser)]
#[command(name = "curator")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "CURATOR_CONFIG_PATH")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Run tag optimization over the untagged rule pool.
    Optimize {
        /// Persist approved classifications without human review.
        #[arg(long)]
        auto_approve: bool,

        /// Process at most this many rules in a single pass (disables
        /// the convergence loop).
        #[arg(short, long)]
        limit: Option<usize>,

        /// Override the worker pool width.
        #[arg(short, long)]
        workers: Option<usize>,

        /// Override the convergence pass ceiling.
        #[arg(long)]
        max_passes: Option<u32>,

        /// Override the oracle-call budget.
        #[arg(long)]
        budget: Option<u64>,
    },

    /// Show repository and vocabulary status.
    Status,
}

/// Main entry point.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    let result = match cli.command {
        Commands::Optimize {
            auto_approve,
            limit,
            workers,
            max_passes,
            budget,
        } => cmd_optimize(config, auto_approve, limit, workers, max_passes, budget).await,
        Commands::Status => cmd_status(&config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        },
    }
}

/// Initializes the tracing subscriber; `RUST_LOG` overrides the default.
fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "curator=debug" } else { "curator=info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Loads configuration from the given path or the default locations.
fn load_config(path: Option<&str>) -> anyhow::Result<CuratorConfig> {
    if let Some(config_path) = path {
        return Ok(CuratorConfig::load_from_file(std::path::Path::new(
            config_path,
        ))?);
    }
    Ok(CuratorConfig::load_default())
}

/// Optimize command.
async fn cmd_optimize(
    mut config: CuratorConfig,
    auto_approve: bool,
    limit: Option<usize>,
    workers: Option<usize>,
    max_passes: Option<u32>,
    budget: Option<u64>,
) -> anyhow::Result<()> {
    if let Some(workers) = workers {
        config.optimizer.max_workers = workers;
    }
    if let Some(max_passes) = max_passes {
        config.optimizer.max_passes = max_passes;
    }
    if let Some(budget) = budget {
        config.optimizer.budget_override = Some(budget);
    }

    let store = RuleStore::open(&config.db_path)?;
    let counts = store.state_counts()?;
    if counts.needs_tags == 0 {
        println!("No rules need tags.");
        println!();
        print_counts(&counts);
        println!();
        println!("Run the extraction pipeline to add rules, or inspect");
        println!("pending_review rules for manual curation.");
        return Ok(());
    }
    drop(store);

    let vocab_store = VocabularyStore::new(&config.vocab_path);
    // Fail before spending any oracle calls if the vocabulary is unusable.
    let vocab = vocab_store.load()?;
    println!(
        "Vocabulary: {} domains, {} tier-2 tags ({})",
        vocab.tier_1_domain_names().len(),
        vocab.all_tier_2_tags().len(),
        config.vocab_path.display()
    );
    println!("Untagged rules: {}", counts.needs_tags);
    if !auto_approve {
        println!("Auto-approve is OFF: proposals will be evaluated but not persisted.");
    }
    println!();

    let oracle = Arc::new(CliOracle::new(config.oracle.clone()));
    let audit = AuditLog::new(config.optimization_audit_path());
    let optimizer = RuleOptimizer::new(
        oracle,
        config.db_path.clone(),
        vocab_store.clone(),
        audit,
        &config.optimizer,
    );
    let executor = PassExecutor::new(optimizer, vocab_store.clone(), config.optimizer.max_workers);
    let controller = ConvergenceController::new(
        config.db_path.clone(),
        vocab_store,
        executor,
        &config.optimizer,
    );

    if let Some(limit) = limit {
        let (result, counts) = controller.run_limited(limit, auto_approve).await?;
        println!("Single pass over {} rules:", result.processed);
        print_pass(1, &result);
        println!();
        print_counts(&counts);
        return Ok(());
    }

    let summary = controller.run(auto_approve).await?;
    print_summary(&summary);
    Ok(())
}

/// Status command.
fn cmd_status(config: &CuratorConfig) -> anyhow::Result<()> {
    println!("Curator Status");
    println!("==============");
    println!();
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("Rule Repository: {}", config.db_path.display());
    match RuleStore::open(&config.db_path) {
        Ok(store) => match store.state_counts() {
            Ok(counts) => print_counts(&counts),
            Err(e) => println!("  Unreadable: {e}"),
        },
        Err(e) => println!("  Unavailable: {e}"),
    }
    println!();

    println!("Vocabulary: {}", config.vocab_path.display());
    match VocabularyStore::new(&config.vocab_path).load() {
        Ok(vocab) => {
            println!("  Tier-1 domains: {}", vocab.tier_1_domain_names().len());
            println!("  Tier-2 tags: {}", vocab.all_tier_2_tags().len());
            println!("  Stopwords: {}", vocab.stopwords().len());
        },
        Err(e) => println!("  Unavailable: {e}"),
    }
    println!();

    println!("Oracle command: {}", config.oracle.command);
    println!("Oracle timeout: {}s", config.oracle.timeout_secs);
    println!(
        "Audit log: {}",
        config.optimization_audit_path().display()
    );

    Ok(())
}

fn print_counts(counts: &StateCounts) {
    println!("  Total rules: {}", counts.total);
    println!("  curated: {}", counts.curated);
    println!("  refined: {}", counts.refined);
    println!("  pending_review: {}", counts.pending_review);
    println!("  needs_tags: {}", counts.needs_tags);
}

fn print_pass(pass: usize, result: &PassResult) {
    println!("Pass {pass}: {} processed", result.processed);
    println!(
        "  approved: {} ({:.1}%), skipped: {} ({:.1}%), errors: {} ({:.1}%)",
        result.approved,
        result.share(result.approved) * 100.0,
        result.skipped,
        result.share(result.skipped) * 100.0,
        result.errors,
        result.share(result.errors) * 100.0
    );
    println!(
        "  improvement {:.1}%, avg confidence {:.2}, {} new vocabulary tags",
        result.improvement_rate * 100.0,
        result.avg_confidence,
        result.new_tags_added
    );
    for (domain, metrics) in &result.domains {
        println!(
            "  {domain}: {}/{} approved ({:.1}%)",
            metrics.approved,
            metrics.processed,
            metrics.improvement_rate * 100.0
        );
    }
}

fn print_summary(summary: &RunSummary) {
    for (i, result) in summary.pass_results.iter().enumerate() {
        print_pass(i + 1, result);
    }
    println!();
    println!(
        "Run finished after {} pass(es), {} oracle calls: {}",
        summary.passes,
        summary.oracle_calls,
        summary.stop_reason.as_str()
    );
    println!();
    print_counts(&summary.counts);
}
