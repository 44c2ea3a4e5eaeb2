use anyhow::{Context, Result};
use bench_core::{build_invoker, run_load, Config, RunSummary, TargetKind};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "loadgen")]
#[command(about = "Invoke the fan-out target at a fixed rate for a fixed duration")]
struct Args {
    /// Path to configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Invocation rate, e.g. 30/s (overrides config)
    #[arg(long)]
    rate: Option<String>,

    /// Run duration, e.g. 60s or 5m (overrides config)
    #[arg(long)]
    duration: Option<String>,

    /// Number of dispatcher workers (overrides config)
    #[arg(long)]
    workers: Option<usize>,

    /// Target mode: lambda, http or mock (overrides config)
    #[arg(long)]
    mode: Option<String>,

    /// Function to invoke (lambda mode)
    #[arg(long)]
    function_name: Option<String>,

    /// Stack whose output names the function (lambda mode)
    #[arg(long)]
    stack_name: Option<String>,

    /// Endpoint to call (http mode)
    #[arg(long)]
    url: Option<String>,

    /// Directory for the JSON run result
    #[arg(long, default_value = "results")]
    results_dir: PathBuf,

    #[arg(long)]
    debug: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct LoadgenResult {
    timestamp: String,
    mode: String,
    rate: String,
    duration: String,
    achieved_rate: f64,
    #[serde(flatten)]
    summary: RunSummary,
}

fn parse_mode(mode: &str) -> Result<TargetKind> {
    match mode {
        "lambda" => Ok(TargetKind::Lambda),
        "http" => Ok(TargetKind::Http),
        "mock" => Ok(TargetKind::Mock),
        _ => anyhow::bail!("Invalid mode: {}, must be 'lambda', 'http' or 'mock'", mode),
    }
}

fn apply_overrides(config: &mut Config, args: &Args) -> Result<()> {
    if let Some(rate) = &args.rate {
        config.run.rate = rate.clone();
    }
    if let Some(duration) = &args.duration {
        config.run.duration = duration.clone();
    }
    if let Some(workers) = args.workers {
        config.run.workers = workers;
    }
    if let Some(mode) = &args.mode {
        config.target.kind = parse_mode(mode)?;
    }
    if args.function_name.is_some() {
        config.target.function_name = args.function_name.clone();
    }
    if args.stack_name.is_some() {
        config.target.stack_name = args.stack_name.clone();
    }
    if args.url.is_some() {
        config.target.url = args.url.clone();
    }
    Ok(())
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
    apply_overrides(&mut config, &args)?;

    // Reject malformed parameters before touching the target
    let plan = config.run.plan().context("Invalid run parameters")?;

    let invoker = build_invoker(&config.target, &config.aws).await?;
    info!(
        "Submitting messages with rate [{}] for [{}] using {}",
        config.run.rate,
        config.run.duration,
        invoker.name()
    );

    let summary = run_load(&plan, invoker.clone()).await;

    let result = LoadgenResult {
        timestamp: chrono::Utc::now().to_rfc3339(),
        mode: invoker.name().to_string(),
        rate: config.run.rate.clone(),
        duration: config.run.duration.clone(),
        achieved_rate: summary.achieved_rate(),
        summary,
    };

    let output_path = write_result(&args.results_dir, &result)?;
    info!("Results written to {:?}", output_path);
    print_summary(&result);

    Ok(())
}

fn write_result(dir: &Path, result: &LoadgenResult) -> Result<PathBuf> {
    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    std::fs::create_dir_all(dir).ok();
    let output_path = dir.join(format!("loadgen_{}.json", timestamp));
    let result_json = serde_json::to_string_pretty(result)?;
    std::fs::write(&output_path, result_json)?;
    Ok(output_path)
}

fn print_summary(result: &LoadgenResult) {
    let s = &result.summary;
    println!("\n=== Load Summary ({}) ===", result.mode);
    println!("Rate: {} for {}", result.rate, result.duration);
    println!("Elapsed: {}ms", s.elapsed_ms);
    println!("Invocations: {}", s.total_invocations);
    println!("Failures: {}", s.total_failures);
    println!("Ticks emitted: {}", s.ticks_emitted);
    println!("Ticks dropped: {}", s.ticks_dropped);
    println!("Achieved rate: {:.2}/s", result.achieved_rate);
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_replace_config_values() {
        let args = Args::parse_from([
            "loadgen",
            "--rate",
            "30/s",
            "--duration",
            "60s",
            "--mode",
            "mock",
        ]);
        let mut config = Config::default();
        apply_overrides(&mut config, &args).unwrap();

        assert_eq!(config.target.kind, TargetKind::Mock);
        let plan = config.run.plan().unwrap();
        assert_eq!(plan.rate.as_f64(), 30.0);
        assert_eq!(plan.duration.as_secs(), 60);
    }

    #[test]
    fn test_malformed_rate_is_rejected() {
        let args = Args::parse_from(["loadgen", "--rate", "30"]);
        let mut config = Config::default();
        apply_overrides(&mut config, &args).unwrap();
        assert!(config.run.plan().is_err());
    }

    #[test]
    fn test_invalid_mode() {
        assert!(parse_mode("grpc").is_err());
    }
}
