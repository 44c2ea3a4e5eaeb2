use crate::params::{check_discarded, parse_duration, parse_rate, ParamError};
use crate::runner::RunPlan;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_RATE: &str = "20/s";
pub const DEFAULT_DURATION: &str = "300s";
pub const DEFAULT_WORKERS: usize = 20;
pub const DEFAULT_QUEUE_CAPACITY: usize = 200;
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 10;
pub const DEFAULT_BATCH_SIZE: usize = 5;
pub const DEFAULT_DISCARDED: f64 = 0.3;
pub const DEFAULT_NAME_MARKER: &str = "_benchmark";
pub const DEFAULT_FILTER_EXPRESSION: &str = r#"annotation.scope = "benchmark""#;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub traces: TracesConfig,
    #[serde(default)]
    pub aws: AwsConfig,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Check every user-supplied value before anything is deployed or dispatched.
    pub fn validate(&self) -> Result<(), ParamError> {
        self.run.plan()?;
        self.traces.discarded()?;
        if self.traces.batch_size == 0 {
            return Err(ParamError::BatchSize);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Invocation rate, e.g. "30/s" or "120/m"
    pub rate: String,
    /// Run duration, e.g. "60s" or "5m"
    pub duration: String,
    /// Number of dispatcher workers sharing the token channel
    pub workers: usize,
    /// Token channel capacity; ticks beyond this are dropped
    pub queue_capacity: usize,
    /// How long a worker waits on an empty channel before re-checking shutdown
    pub poll_timeout_ms: u64,
    /// Elapsed-time progress interval in milliseconds
    pub progress_every_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            rate: DEFAULT_RATE.to_string(),
            duration: DEFAULT_DURATION.to_string(),
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            progress_every_ms: 1000,
        }
    }
}

impl RunConfig {
    pub fn plan(&self) -> Result<RunPlan, ParamError> {
        if self.workers == 0 {
            return Err(ParamError::Zero("workers"));
        }
        if self.queue_capacity == 0 {
            return Err(ParamError::Zero("queue_capacity"));
        }
        if self.poll_timeout_ms == 0 {
            return Err(ParamError::Zero("poll_timeout_ms"));
        }
        Ok(RunPlan {
            rate: parse_rate(&self.rate)?,
            duration: parse_duration(&self.duration)?,
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            progress_every: Duration::from_millis(self.progress_every_ms.max(1)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    #[default]
    Lambda,
    Http,
    Mock,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub kind: TargetKind,
    /// Function to invoke directly (lambda mode)
    pub function_name: Option<String>,
    /// Deployed stack whose output names the function (lambda mode)
    pub stack_name: Option<String>,
    /// Stack output key; the first output is used when unset
    pub output_key: Option<String>,
    /// Fan-out endpoint (http mode)
    pub url: Option<String>,
    /// Request timeout in milliseconds (http mode)
    pub timeout_ms: Option<u64>,
    /// Simulated submission latency (mock mode)
    pub mock_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracesConfig {
    /// Fraction, between 0 and 1, of the run discarded from the start of the window
    pub discarded: f64,
    /// Trace ids per bulk fetch call
    pub batch_size: usize,
    /// Substring a segment name must contain to be measured
    pub name_marker: String,
    /// Trace store search filter
    pub filter_expression: String,
    /// Wait after the run before collecting, letting delivery paths flush
    pub drain_ms: u64,
}

impl Default for TracesConfig {
    fn default() -> Self {
        Self {
            discarded: DEFAULT_DISCARDED,
            batch_size: DEFAULT_BATCH_SIZE,
            name_marker: DEFAULT_NAME_MARKER.to_string(),
            filter_expression: DEFAULT_FILTER_EXPRESSION.to_string(),
            drain_ms: 0,
        }
    }
}

impl TracesConfig {
    pub fn discarded(&self) -> Result<f64, ParamError> {
        check_discarded(self.discarded)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    pub region: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_serde() {
        let config_str = r#"
[run]
rate = "30/s"
duration = "60s"
workers = 8

[target]
kind = "lambda"
stack_name = "pubsub-benchmark"

[traces]
discarded = 0.2
batch_size = 5

[aws]
region = "eu-west-1"
        "#;

        let config: Config = toml::from_str(config_str).unwrap();
        assert_eq!(config.run.rate, "30/s");
        assert_eq!(config.run.workers, 8);
        assert_eq!(config.run.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.target.kind, TargetKind::Lambda);
        assert_eq!(config.target.stack_name.as_deref(), Some("pubsub-benchmark"));
        assert_eq!(config.traces.discarded, 0.2);
        assert_eq!(config.traces.name_marker, DEFAULT_NAME_MARKER);
        assert_eq!(config.aws.region.as_deref(), Some("eu-west-1"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        let plan = config.run.plan().unwrap();
        assert_eq!(plan.rate.as_f64(), 20.0);
        assert_eq!(plan.duration, Duration::from_secs(300));
        assert_eq!(plan.workers, 20);
        assert_eq!(plan.queue_capacity, 200);
        assert_eq!(plan.poll_timeout, Duration::from_millis(10));
        assert_eq!(config.traces.batch_size, 5);
        assert_eq!(config.traces.discarded, 0.3);
    }

    #[test]
    fn test_shipped_configs_are_valid() {
        for name in ["example.toml", "example.mock.toml"] {
            let path = format!("{}/../../config/{}", env!("CARGO_MANIFEST_DIR"), name);
            let config = Config::from_file(&path).unwrap();
            assert!(config.validate().is_ok(), "{name}");
        }
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.run.rate = "30".to_string();
        assert!(matches!(config.validate(), Err(ParamError::Rate(_))));

        let mut config = Config::default();
        config.traces.discarded = 1.0;
        assert!(matches!(config.validate(), Err(ParamError::Discarded(_))));

        let mut config = Config::default();
        config.traces.batch_size = 0;
        assert!(matches!(config.validate(), Err(ParamError::BatchSize)));

        let mut config = Config::default();
        config.run.workers = 0;
        assert!(matches!(config.validate(), Err(ParamError::Zero("workers"))));
    }
}
