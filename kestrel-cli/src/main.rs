//! Kestrel CLI
//!
//! Harvest public records from paginated APIs and label them with a trained
//! classifier.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use kestrel_core::{Source, TextFeatures, DEFAULT_BATCH_SIZE};
use kestrel_net::{HttpConfig, HttpPageSource};
use kestrel_pipeline::{
    CollectOptions, Collector, CollectorConfig, LogProgress, ModelRegistry, ScoreOptions, Scorer,
};
use kestrel_store::{RecordStore, SqliteStore};

#[derive(Parser)]
#[command(name = "kestrel")]
#[command(author, version, about = "Kestrel: incremental record harvesting and classification", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database file
    #[arg(long, global = true, env = "KESTREL_DATABASE", default_value = "kestrel.db")]
    database: PathBuf,

    /// Verbosity level (0-3)
    #[arg(short, long, global = true, default_value = "1")]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect records from a source's API
    Collect {
        /// Source from which to collect records
        #[arg(value_parser = parse_source)]
        source: Source,

        /// Resume data collection from this page
        #[arg(long)]
        resume: Option<u32>,

        /// Stop after this many records
        #[arg(long)]
        limit: Option<u64>,

        /// HTTP request timeout in seconds
        #[arg(long, env = "KESTREL_HTTP_TIMEOUT", default_value = "20")]
        timeout: u64,
    },

    /// Label records with the source's trained model
    Predict {
        /// Source for which to make predictions
        #[arg(value_parser = parse_source)]
        source: Source,

        /// Number of records per batch
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        /// Re-process records whose predicted label is set
        #[arg(long)]
        overwrite: bool,

        /// Directory containing trained models
        #[arg(long, env = "KESTREL_MODEL_DIR", default_value = "models")]
        model_dir: PathBuf,
    },

    /// Show record counts per source
    Stats {
        /// Limit to one source
        #[arg(value_parser = parse_source)]
        source: Option<Source>,
    },
}

fn parse_source(s: &str) -> Result<Source, String> {
    s.parse::<Source>().map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = match cli.verbose {
        0 => Level::ERROR,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let store = SqliteStore::open(&cli.database)?;

    match cli.command {
        Commands::Collect {
            source,
            resume,
            limit,
            timeout,
        } => {
            run_collect(&store, source, resume, limit, timeout).await?;
        }
        Commands::Predict {
            source,
            batch_size,
            overwrite,
            model_dir,
        } => {
            run_predict(&store, source, batch_size, overwrite, model_dir)?;
        }
        Commands::Stats { source } => {
            show_stats(&store, source)?;
        }
    }

    Ok(())
}

async fn run_collect(
    store: &SqliteStore,
    source: Source,
    resume: Option<u32>,
    limit: Option<u64>,
    timeout: u64,
) -> Result<()> {
    let pages = HttpPageSource::new(&HttpConfig::default().with_timeout(timeout))?;
    let collector = Collector::new(store, &pages, CollectorConfig::default());
    let options = CollectOptions {
        resume_page: resume,
        limit,
    };

    let mut progress = LogProgress::new(100);
    let report = collector.collect(source, options, &mut progress).await?;

    println!(
        "{} new records, {} updated from {} (slept {:.1}s)",
        report.inserted, report.updated, source, report.idle_seconds
    );

    if let Some(reason) = &report.stopped {
        anyhow::bail!(
            "Collection stopped early: {}. Resume with: kestrel collect {} --resume {}",
            reason,
            source,
            report.resume_hint(&options)
        );
    }

    Ok(())
}

fn run_predict(
    store: &SqliteStore,
    source: Source,
    batch_size: usize,
    overwrite: bool,
    model_dir: PathBuf,
) -> Result<()> {
    let model = ModelRegistry::new(model_dir).load(source)?;
    let extractor = TextFeatures;
    let scorer = Scorer::new(store, &model, &extractor);

    let mut progress = LogProgress::new(1);
    let report = scorer.score(
        source,
        ScoreOptions {
            batch_size,
            overwrite,
        },
        &mut progress,
    )?;

    println!(
        "{} records labelled for {} ({} positive)",
        report.scored, source, report.positive
    );
    Ok(())
}

fn show_stats(store: &SqliteStore, source: Option<Source>) -> Result<()> {
    let sources = match source {
        Some(source) => vec![source],
        None => Source::ALL.to_vec(),
    };

    println!("{:<16} {:>10} {:>10} {:>10} {:>10}", "source", "records", "scored", "positive", "manual");
    for source in sources {
        let stats = store.stats(source)?;
        println!(
            "{:<16} {:>10} {:>10} {:>10} {:>10}",
            source.as_str(),
            stats.total,
            stats.scored,
            stats.positive,
            stats.manually_labeled
        );
    }

    Ok(())
}
