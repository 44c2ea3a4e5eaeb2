use anyhow::{Context, Result};
use bench_core::{
    collect_stats, load_aws_config, parse_duration, Collection, Config, InMemoryTraceStore,
    TraceStore, XrayTraceStore,
};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "collector")]
#[command(about = "Fetch benchmark traces and compute latency statistics per delivery path")]
struct Args {
    /// Path to configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Duration of the run being measured, e.g. 300s (overrides config)
    #[arg(long)]
    duration: Option<String>,

    /// Fraction, between 0 and 1, of the run discarded from the start
    #[arg(long)]
    discarded: Option<f64>,

    /// Trace ids per bulk fetch
    #[arg(long)]
    batch_size: Option<usize>,

    /// AWS region (overrides config)
    #[arg(long)]
    region: Option<String>,

    /// Aggregate traces from a JSON file instead of querying the trace store
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Directory for the JSON statistics
    #[arg(long, default_value = "results")]
    results_dir: PathBuf,

    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "{default_filter},aws_config=warn,aws_smithy_runtime=warn,hyper=warn"
                ))
            }),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => Config::default(),
    };
    if let Some(duration) = &args.duration {
        config.run.duration = duration.clone();
    }
    if let Some(discarded) = args.discarded {
        config.traces.discarded = discarded;
    }
    if let Some(batch_size) = args.batch_size {
        config.traces.batch_size = batch_size;
    }
    if args.region.is_some() {
        config.aws.region = args.region.clone();
    }
    config.validate().context("Invalid parameters")?;
    let duration = parse_duration(&config.run.duration)?;

    let store: Box<dyn TraceStore> = match &args.replay {
        Some(path) => Box::new(InMemoryTraceStore::from_file(path)?),
        None => Box::new(XrayTraceStore::new(&load_aws_config(&config.aws).await)),
    };

    let collection = collect_stats(store.as_ref(), &config.traces, duration).await?;
    if collection.report.is_empty() {
        warn!("No measurable deliveries in the window");
    }

    let output_path = write_collection(&args.results_dir, &collection)?;
    info!("Statistics written to {:?}", output_path);

    print_collection(&collection);
    Ok(())
}

fn write_collection(dir: &Path, collection: &Collection) -> Result<PathBuf> {
    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    std::fs::create_dir_all(dir).ok();
    let output_path = dir.join(format!("stats_{}.json", timestamp));
    std::fs::write(&output_path, serde_json::to_string_pretty(collection)?)?;
    Ok(output_path)
}

fn print_collection(collection: &Collection) {
    println!(
        "\n=== Latency statistics ({} traces, {} to {}) ===",
        collection.trace_ids, collection.window.start, collection.window.end
    );
    print!("{}", collection.report);
    println!(
        "Dropped: non-positive={} unlabeled={} in-progress={}",
        collection.report.discarded_non_positive,
        collection.report.unlabeled,
        collection.in_progress
    );
    println!();
}
