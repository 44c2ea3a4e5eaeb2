use anyhow::{Context, Result};
use bench_core::{
    build_invoker, collect_stats, load_aws_config, run_load, Collection, Config,
    InMemoryTraceStore, Rate, RunSummary, TraceStore, XrayTraceStore,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "controller")]
#[command(about = "Run a latency benchmark of the pub/sub delivery paths behind a fan-out target")]
struct Args {
    /// Path to configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Rate of messages delivered to the delivery paths, e.g. 30/s
    #[arg(long, value_parser = parse_rate_arg)]
    rate: Option<String>,

    /// Duration of the benchmark, e.g. 300s or 5m
    #[arg(long, value_parser = parse_duration_arg)]
    duration: Option<String>,

    /// Fraction, between 0 and 1, of traces discarded from the start of the run
    #[arg(long)]
    discarded: Option<f64>,

    /// Stack whose output names the fan-out function
    #[arg(long)]
    stack_name: Option<String>,

    /// Fan-out function name (skips the stack lookup)
    #[arg(long)]
    function_name: Option<String>,

    /// Seconds to wait after the run before collecting traces
    #[arg(long)]
    drain_secs: Option<u64>,

    /// Free-form run label printed with the results, e.g. memory=512
    #[arg(long = "label", value_parser = parse_label)]
    labels: Vec<(String, String)>,

    /// Aggregate traces from a JSON file instead of querying the trace store
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Print the validated plan without running
    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    debug: bool,
}

fn parse_rate_arg(s: &str) -> Result<String, String> {
    s.parse::<Rate>().map(|_| s.to_string()).map_err(|e| e.to_string())
}

fn parse_duration_arg(s: &str) -> Result<String, String> {
    bench_core::parse_duration(s)
        .map(|_| s.to_string())
        .map_err(|e| e.to_string())
}

fn parse_label(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("label must be key=value, got {s:?}"))?;
    if key.is_empty() {
        return Err(format!("label key is empty in {s:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[derive(Debug, Serialize, Deserialize)]
struct BenchmarkResult {
    timestamp: String,
    run_id: String,
    labels: Vec<(String, String)>,
    run: RunSummary,
    stats: Collection,
}

fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(rate) = &args.rate {
        config.run.rate = rate.clone();
    }
    if let Some(duration) = &args.duration {
        config.run.duration = duration.clone();
    }
    if let Some(discarded) = args.discarded {
        config.traces.discarded = discarded;
    }
    if args.stack_name.is_some() {
        config.target.stack_name = args.stack_name.clone();
    }
    if args.function_name.is_some() {
        config.target.function_name = args.function_name.clone();
    }
    if let Some(drain) = args.drain_secs {
        config.traces.drain_ms = drain.saturating_mul(1000);
    }
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
    apply_overrides(&mut config, &args);

    // Everything is validated before the target is resolved or invoked
    config.validate().context("Invalid parameters")?;
    let plan = config.run.plan()?;

    if args.dry_run {
        print_plan(&config);
        return Ok(());
    }

    let run_id = chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string();
    let invoker = build_invoker(&config.target, &config.aws).await?;
    info!(
        "Submitting messages with rate [{}] for [{}] (run_id={})",
        config.run.rate, config.run.duration, run_id
    );
    let run = run_load(&plan, invoker).await;

    if config.traces.drain_ms > 0 {
        info!("Draining for {}ms before collecting", config.traces.drain_ms);
        tokio::time::sleep(Duration::from_millis(config.traces.drain_ms)).await;
    }

    let store: Box<dyn TraceStore> = match &args.replay {
        Some(path) => Box::new(InMemoryTraceStore::from_file(path)?),
        None => Box::new(XrayTraceStore::new(&load_aws_config(&config.aws).await)),
    };
    let stats = collect_stats(store.as_ref(), &config.traces, plan.duration).await?;
    if stats.report.is_empty() {
        warn!("No measurable deliveries in the window");
    }

    let result = BenchmarkResult {
        timestamp: chrono::Utc::now().to_rfc3339(),
        run_id,
        labels: args.labels.clone(),
        run,
        stats,
    };
    save_result(&result)?;
    print_result(&result);

    Ok(())
}

fn print_plan(config: &Config) {
    println!("\n=== Dry Run ===");
    println!("rate: {}", config.run.rate);
    println!("duration: {}", config.run.duration);
    println!("workers: {}", config.run.workers);
    println!("queue capacity: {}", config.run.queue_capacity);
    println!("target: {:?}", config.target.kind);
    println!("discarded: {}", config.traces.discarded);
    println!("batch size: {}", config.traces.batch_size);
    println!();
}

fn save_result(result: &BenchmarkResult) -> Result<()> {
    let dir = Path::new("results");
    std::fs::create_dir_all(dir).ok();
    let output_path = dir.join(format!("run_{}.json", result.run_id));
    std::fs::write(&output_path, serde_json::to_string_pretty(result)?)?;
    info!("Results written to {:?}", output_path);
    Ok(())
}

fn print_result(result: &BenchmarkResult) {
    let labels: Vec<String> = result
        .labels
        .iter()
        .map(|(k, v)| format!("{k} [{v}]"))
        .collect();
    println!(
        "\n=== Latency statistics (run_id={}) {} ===",
        result.run_id,
        labels.join(" -- ")
    );
    println!(
        "Invocations: {} ({} failures) in {}ms",
        result.run.total_invocations, result.run.total_failures, result.run.elapsed_ms
    );
    print!("{}", result.stats.report);
    println!();
}
