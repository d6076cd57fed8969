//! Seer: deterministic image sharding and streaming batch loading.
//!
//! Seer turns a labeled image manifest into fixed-size TFRecord shards plus a
//! JSON metadata document, and streams those shards back as shuffled,
//! batched, repeated training data.
//!
//! # Modules
//!
//! - [`manifest`]: Manifest CSV rows and the dense category index
//! - [`record`]: Record encoding and TFRecord shard framing
//! - [`shard`]: The manifest sharder and dataset metadata
//! - [`loader`]: Deterministic splitting and lazy batch streams
//! - [`training`]: Metrics sinks, training events, and the epoch driver
//! - [`error`]: Error types for seer operations

pub mod error;
pub mod loader;
pub mod manifest;
pub mod record;
pub mod shard;
pub mod training;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

pub use error::SeerError;

use loader::{Loader, Repeat, Split, StreamOptions};
use manifest::ManifestOptions;
use shard::ShardOptions;
use training::{BatchStats, RunLogger, TracingSink};

/// The seer CLI application.
#[derive(Parser)]
#[command(name = "seer")]
#[command(version, author, about)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Build a manifest CSV from a class-per-directory image tree.
    Index(IndexArgs),
    /// Convert a manifest's images into TFRecord shards.
    Shard(ShardArgs),
    /// Show how a dataset's shards split into train/test/validation.
    Split(SplitArgs),
    /// Stream a dataset end to end and report batch statistics.
    Check(CheckArgs),
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum ReportFormat {
    #[default]
    Text,
    Json,
}

/// Arguments for the index subcommand.
#[derive(clap::Args)]
struct IndexArgs {
    /// Root directory with one subdirectory per category.
    input: PathBuf,

    /// Manifest CSV to write.
    #[arg(short, long)]
    output: PathBuf,
}

/// Arguments for the shard subcommand.
#[derive(clap::Args)]
struct ShardArgs {
    /// Manifest CSV (path, label name, label index).
    #[arg(short, long)]
    manifest: PathBuf,

    /// Directory the manifest's image paths are relative to.
    #[arg(short = 'd', long)]
    image_root: PathBuf,

    /// Output directory (data root for shards, listing, and metadata).
    #[arg(short, long)]
    output: PathBuf,

    /// Records per shard.
    #[arg(short = 'r', long, default_value_t = shard::DEFAULT_SHARD_SIZE)]
    shard_size: usize,

    /// Resize height and width.
    #[arg(short, long, default_value_t = shard::DEFAULT_IMAGE_SIZE)]
    image_size: u32,

    /// Remove previous output before sharding.
    #[arg(short, long)]
    force: bool,

    /// Concurrent image decodes.
    #[arg(short, long, default_value_t = 1, env = "SEER_WORKERS")]
    workers: usize,

    /// The manifest's first row is a header.
    #[arg(long)]
    has_header: bool,

    /// Report format.
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    report: ReportFormat,
}

/// Arguments for the split subcommand.
#[derive(clap::Args)]
struct SplitArgs {
    /// Dataset metadata JSON, or a shard listing file.
    input: PathBuf,

    /// Train/test/validation ratios.
    #[arg(long, default_value = "8,1,1")]
    ratios: String,

    /// Report format.
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    report: ReportFormat,
}

/// Arguments for the check subcommand.
#[derive(clap::Args)]
struct CheckArgs {
    /// Dataset metadata JSON.
    metadata: PathBuf,

    /// Train/test/validation ratios.
    #[arg(long, default_value = "8,1,1")]
    ratios: String,

    /// Batch size.
    #[arg(short, long, default_value_t = 32)]
    batch: usize,

    /// Passes over the training split.
    #[arg(short, long, default_value_t = 10)]
    epochs: usize,

    /// Shuffle window in records (0 disables shuffling).
    #[arg(long, default_value_t = 10_000)]
    shuffle_buffer: usize,

    /// Batches read ahead on a background thread (0 reads inline).
    #[arg(long, default_value_t = 5)]
    prefetch: usize,

    /// Seed for a reproducible shuffle order.
    #[arg(long)]
    seed: Option<u64>,

    /// Report format.
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    report: ReportFormat,
}

/// Run the seer CLI.
///
/// This is the main entry point for the CLI, called from `main.rs`.
pub fn run() -> Result<(), SeerError> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Index(args)) => run_index(args),
        Some(Commands::Shard(args)) => run_shard(args),
        Some(Commands::Split(args)) => run_split(args),
        Some(Commands::Check(args)) => run_check(args),
        None => {
            println!("seer {}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Deterministic image sharding and streaming batch loading.");
            println!();
            println!("Run 'seer --help' for usage information.");
            Ok(())
        }
    }
}

fn run_index(args: IndexArgs) -> Result<(), SeerError> {
    let (entries, categories) = manifest::index::index_image_tree(&args.input)?;
    manifest::write_manifest(&args.output, &entries)?;

    println!(
        "Indexed {} image(s) in {} categor{} to {}",
        entries.len(),
        categories.len(),
        if categories.len() == 1 { "y" } else { "ies" },
        args.output.display()
    );
    for (index, name) in categories.names().iter().enumerate() {
        println!("  {} => {}", index, name);
    }
    Ok(())
}

fn run_shard(args: ShardArgs) -> Result<(), SeerError> {
    let mut options = ShardOptions::new(args.manifest, args.image_root, args.output);
    options.shard_size = args.shard_size;
    options.image_size = args.image_size;
    options.force = args.force;
    options.workers = args.workers;
    options.manifest = ManifestOptions {
        has_header: args.has_header,
    };

    let report = shard::shard_with_report(&options)?;

    match args.report {
        ReportFormat::Json => {
            let skipped: Vec<serde_json::Value> = report
                .skipped
                .iter()
                .map(|s| {
                    serde_json::json!({
                        "row": s.row,
                        "path": s.relative_path,
                        "reason": s.reason,
                    })
                })
                .collect();
            let out = serde_json::json!({
                "metadata": report.metadata,
                "shard_counts": report.shard_counts,
                "skipped": skipped,
            });
            print_json(&out)?;
        }
        ReportFormat::Text => print!("{}", report),
    }
    Ok(())
}

fn run_split(args: SplitArgs) -> Result<(), SeerError> {
    let ratios = loader::parse_ratios(&args.ratios)?;

    let is_metadata = args
        .input
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let shards = if is_metadata {
        shard::DatasetMetadata::load(&args.input)?.shard_file_list
    } else {
        shard::read_listing(&args.input)?
    };

    let (train, test, validation) = loader::split_manifest(&shards, &ratios)?;

    match args.report {
        ReportFormat::Json => {
            let out = serde_json::json!({
                "train": train,
                "test": test,
                "validation": validation,
            });
            print_json(&out)?;
        }
        ReportFormat::Text => {
            println!("Splitting {} shard(s):", shards.len());
            for (split, files) in [
                (Split::Train, &train),
                (Split::Test, &test),
                (Split::Validation, &validation),
            ] {
                println!("  {:>10}: {}", split.name(), files.len());
                for file in files {
                    println!("              {}", file);
                }
            }
        }
    }
    Ok(())
}

fn run_check(args: CheckArgs) -> Result<(), SeerError> {
    let ratios = loader::parse_ratios(&args.ratios)?;
    let loader = Loader::open(&args.metadata, &ratios)?;
    let categories = loader.metadata().category_index.len();

    let options = StreamOptions {
        batch_size: args.batch,
        shuffle_buffer: args.shuffle_buffer,
        prefetch_depth: args.prefetch,
        repeat: Repeat::Count(args.epochs),
        seed: args.seed,
    };
    let steps = loader.steps_per_epoch(Split::Train, args.batch);
    let train = loader.train_stream(options)?;

    let sink = TracingSink;
    let mut events = RunLogger::new(&sink);
    let final_metrics = training::fit(
        train,
        args.epochs,
        steps,
        &mut BatchStats::new(categories),
        &mut events,
    )?;

    let mut eval_records = Vec::new();
    for split in [Split::Test, Split::Validation] {
        let mut records = 0;
        for batch in loader.stream(split, StreamOptions::sequential(args.batch))? {
            records += batch?.len();
        }
        eval_records.push((split, records));
    }

    match args.report {
        ReportFormat::Json => {
            let mut out = serde_json::json!({
                "image_shape": loader.image_shape(),
                "categories": loader.metadata().category_index.names(),
                "steps_per_epoch": steps,
                "final": final_metrics,
            });
            for (split, records) in &eval_records {
                out[format!("{}_records", split.name())] = serde_json::json!(records);
            }
            print_json(&out)?;
        }
        ReportFormat::Text => {
            let shape = loader.image_shape();
            println!(
                "Checked {} epoch(s) of {} step(s), image shape {}x{}x{}",
                args.epochs, steps, shape[0], shape[1], shape[2]
            );
            for (name, value) in &final_metrics {
                println!("  final_{}: {:.4}", name, value);
            }
            for (split, records) in &eval_records {
                println!("  {} records: {}", split.name(), records);
            }
        }
    }
    Ok(())
}

fn print_json(value: &serde_json::Value) -> Result<(), SeerError> {
    let text = serde_json::to_string_pretty(value).map_err(|source| SeerError::MetadataWrite {
        path: PathBuf::from("<stdout>"),
        source,
    })?;
    println!("{}", text);
    Ok(())
}
