use crate::config::{DEFAULT_POLL_TIMEOUT_MS, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS};
use crate::dispatcher::{shared, Worker, WorkerReport};
use crate::invoker::Invoker;
use crate::params::Rate;
use crate::rate_source::{RateSource, RateSourceReport, Token};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Everything needed to drive one load run.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub rate: Rate,
    pub duration: Duration,
    pub workers: usize,
    pub queue_capacity: usize,
    pub poll_timeout: Duration,
    pub progress_every: Duration,
}

impl RunPlan {
    pub fn new(rate: Rate, duration: Duration) -> Self {
        Self {
            rate,
            duration,
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
            progress_every: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub rate_per_second: f64,
    pub duration_ms: u64,
    pub elapsed_ms: u64,
    pub total_invocations: u64,
    pub total_failures: u64,
    pub ticks_emitted: u64,
    pub ticks_dropped: u64,
    pub workers: Vec<WorkerReport>,
}

impl RunSummary {
    pub fn achieved_rate(&self) -> f64 {
        if self.elapsed_ms == 0 {
            return 0.0;
        }
        self.total_invocations as f64 * 1000.0 / self.elapsed_ms as f64
    }
}

/// Drive the target at `plan.rate` for `plan.duration`.
///
/// The rate source and workers only share the token channel. Workers are
/// stopped and joined first, then the rate source. Totals are summed from the
/// joined workers and are diagnostic only; a worker that panicked contributes
/// nothing. A zero queue capacity is treated as one.
pub async fn run_load(plan: &RunPlan, invoker: Arc<dyn Invoker>) -> RunSummary {
    let (tx, rx) = mpsc::channel::<Token>(plan.queue_capacity.max(1));
    let rx = shared(rx);

    let source_shutdown = CancellationToken::new();
    let workers_shutdown = CancellationToken::new();

    let source = tokio::spawn(RateSource::new(plan.rate, tx, source_shutdown.clone()).run());
    let handles: Vec<_> = (0..plan.workers)
        .map(|id| {
            let worker = Worker::new(
                id,
                rx.clone(),
                invoker.clone(),
                plan.poll_timeout,
                workers_shutdown.clone(),
            );
            tokio::spawn(worker.run())
        })
        .collect();

    info!(
        "Started rate source ({}) and {} workers using {}",
        plan.rate,
        plan.workers,
        invoker.name()
    );

    let start = Instant::now();
    let deadline = start + plan.duration;
    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        sleep_until((now + plan.progress_every).min(deadline)).await;
        info!("Elapsed time {:.1}s", start.elapsed().as_secs_f64());
    }

    workers_shutdown.cancel();
    let mut workers = Vec::with_capacity(handles.len());
    for h in handles {
        match h.await {
            Ok(report) => workers.push(report),
            Err(e) => warn!("Worker task failed: {}", e),
        }
    }

    let elapsed = start.elapsed();

    source_shutdown.cancel();
    let ticks = source.await.unwrap_or_else(|e| {
        warn!("Rate source task failed: {}", e);
        RateSourceReport::default()
    });

    let summary = RunSummary {
        rate_per_second: plan.rate.as_f64(),
        duration_ms: plan.duration.as_millis() as u64,
        elapsed_ms: elapsed.as_millis() as u64,
        total_invocations: workers.iter().map(|w| w.invocations).sum(),
        total_failures: workers.iter().map(|w| w.failures).sum(),
        ticks_emitted: ticks.emitted,
        ticks_dropped: ticks.dropped,
        workers,
    };

    info!(
        "Run {} invocations in {:.1} seconds ({} failures, {} ticks dropped)",
        summary.total_invocations,
        elapsed.as_secs_f64(),
        summary.total_failures,
        summary.ticks_dropped
    );
    summary
}
