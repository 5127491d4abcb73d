//! Page-Harvest main entry point
//!
//! This is the command-line interface for the Page-Harvest content harvester.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use page_harvest::config::{load_config_with_hash, save_config, validate, RunConfig};
use page_harvest::crawler::{harvest, WorkItem};
use page_harvest::output::{print_run_summary, print_statistics, write_statistics, StatisticsAggregator};
use page_harvest::record::{Article, Medicine, Record};
use page_harvest::storage::SqliteIndex;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Page-Harvest: a paginated content harvester
///
/// Page-Harvest walks the numbered listing pages of a source with a bounded
/// worker pool and records every extracted record in a document store, a
/// SQLite index and a flat-file JSON export.
#[derive(Parser, Debug)]
#[command(name = "page-harvest")]
#[command(version)]
#[command(about = "A paginated content harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Harvest every listing page of the configured source
    Run {
        /// Record type served by the source
        #[arg(long, value_enum, default_value_t = Kind::Medicine)]
        kind: Kind,
    },

    /// Show and write statistics from the index and exit
    Stats {
        #[arg(long, value_enum, default_value_t = Kind::Medicine)]
        kind: Kind,
    },

    /// Validate config and show what would be harvested without fetching
    Check,

    /// Create or change the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write a configuration file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Change one [run] value, e.g. `concurrency 8` or `max-pages -1`
    Set {
        key: String,
        #[arg(allow_hyphen_values = true)]
        value: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Medicine,
    Article,
}

impl Kind {
    fn name(self) -> &'static str {
        match self {
            Kind::Medicine => Medicine::KIND,
            Kind::Article => Article::KIND,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Config management works on files that may not exist or validate yet
    if let Command::Config { action } = &cli.command {
        return handle_config(&cli.config, action);
    }

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    match cli.command {
        Command::Run { kind } => handle_run(config, kind).await,
        Command::Stats { kind } => handle_stats(&config, kind),
        Command::Check => handle_check(&config),
        Command::Config { .. } => Ok(()),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("page_harvest=info,warn"),
            1 => EnvFilter::new("page_harvest=debug,info"),
            2 => EnvFilter::new("page_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles `run`: harvests until done or Ctrl-C
async fn handle_run(config: RunConfig, kind: Kind) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; finishing in-flight pages");
            signal_token.cancel();
        }
    });

    tracing::info!(
        "Harvesting {} records from {} with {} workers",
        kind.name(),
        config.source.url_template,
        config.run.concurrency
    );

    let report = match kind {
        Kind::Medicine => harvest::<Medicine>(config, cancel).await,
        Kind::Article => harvest::<Article>(config, cancel).await,
    }
    .context("Harvest failed")?;

    println!();
    println!("Run #{} {}", report.run_id, if report.cancelled { "cancelled" } else { "finished" });
    println!(
        "  Pages: {} dispatched, {} completed, {} failed (of {})",
        report.dispatched, report.completed, report.failed, report.total_pages
    );
    println!(
        "  Records: {} saved, {} failed",
        report.records_saved, report.records_failed
    );
    println!("  Documents: {}", report.document_store.display());
    match &report.statistics_path {
        Some(path) => println!("  Statistics: {}", path.display()),
        None => println!("  Statistics: not written, see the log"),
    }

    Ok(())
}

/// Handles `stats`: prints statistics from the index
fn handle_stats(config: &RunConfig, kind: Kind) -> anyhow::Result<()> {
    let index_path = Path::new(&config.output.index_path);
    if !index_path.exists() {
        bail!("No index found at {}; run a harvest first", index_path.display());
    }
    println!("Index: {}\n", index_path.display());

    let index = SqliteIndex::open(index_path)?;
    if let Some(run) = index.latest_run()? {
        print_run_summary(&run);
    }

    let stats = StatisticsAggregator::new(&index).aggregate(kind.name(), config.output.top_tags)?;
    print_statistics(&stats);
    let path = write_statistics(&stats, Path::new(&config.output.export_root))?;
    println!("Statistics written to {}", path.display());

    Ok(())
}

/// Handles `check`: validates config and shows the plan
fn handle_check(config: &RunConfig) -> anyhow::Result<()> {
    validate(config)?;

    println!("=== Page-Harvest Check ===\n");

    println!("Source:");
    println!("  URL template: {}", config.source.url_template);
    let first = WorkItem::from_template(&config.source.url_template, config.run.start_page)?;
    println!("  First page: {}", first.url);
    println!("  User agent: {}", config.source.user_agent);
    if config.source.accept_invalid_certs {
        println!("  TLS certificate validation: DISABLED");
    }

    println!("\nRun:");
    println!("  Concurrency: {}", config.run.concurrency);
    println!(
        "  Politeness delay: {}-{}ms",
        config.run.delay_min_ms, config.run.delay_max_ms
    );
    println!("  Start page: {}", config.run.start_page);
    if config.run.max_pages < 0 {
        println!("  Max pages: unbounded");
    } else {
        println!("  Max pages: {}", config.run.max_pages);
    }
    match config.run.default_total_pages {
        Some(total) => println!("  Fallback page count: {}", total),
        None => println!("  Fallback page count: none"),
    }

    println!("\nFetch:");
    println!("  Attempts: {}", config.fetch.max_retries);
    println!("  Timeout: {}s", config.fetch.timeout_secs);

    println!("\nOutput:");
    println!("  Documents: {}", config.output.document_store_path);
    println!("  Index: {}", config.output.index_path);
    println!("  Export root: {}", config.output.export_root);

    println!("\n✓ Configuration is valid");
    Ok(())
}

/// Handles `config init` and `config set`
fn handle_config(path: &Path, action: &ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                bail!("{} already exists; pass --force to overwrite", path.display());
            }
            save_config(&RunConfig::default(), path)?;
            println!("✓ Wrote default configuration to {}", path.display());
        }
        ConfigAction::Set { key, value } => {
            let (mut config, _) = load_config_with_hash(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
            config.run.set(key, value)?;
            save_config(&config, path)?;
            println!("✓ {} = {}", key, value);
        }
    }
    Ok(())
}
