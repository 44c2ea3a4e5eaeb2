use crate::config::TracesConfig;
use crate::fetcher::TraceFetcher;
use crate::segment::process_segments;
use crate::stats::{aggregate, StatsReport};
use crate::store::TraceStore;
use crate::window::TraceWindow;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// Result of one aggregation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub window: TraceWindow,
    pub trace_ids: usize,
    pub segments_fetched: usize,
    pub unmarked: usize,
    pub in_progress: usize,
    pub report: StatsReport,
}

/// Gather latency statistics for a run of length `duration` that just ended.
pub async fn collect_stats(
    store: &dyn TraceStore,
    traces: &TracesConfig,
    duration: Duration,
) -> Result<Collection> {
    let window = TraceWindow::resolve(duration, traces.discarded()?)?;
    collect_in_window(store, traces, window).await
}

pub async fn collect_in_window(
    store: &dyn TraceStore,
    traces: &TracesConfig,
    window: TraceWindow,
) -> Result<Collection> {
    info!("Gathering benchmark results from {}", store.name());
    let fetcher = TraceFetcher::new(store, traces.batch_size, traces.filter_expression.clone())?;
    let fetched = fetcher.fetch(&window).await?;

    let processed = process_segments(&fetched.documents, &traces.name_marker)?;
    let report = aggregate(&processed.segments);

    info!(
        "Aggregated {} benchmark segments into {} services",
        processed.segments.len(),
        report.rows.len()
    );
    Ok(Collection {
        window,
        trace_ids: fetched.trace_ids,
        segments_fetched: fetched.documents.len(),
        unmarked: processed.unmarked,
        in_progress: processed.in_progress,
        report,
    })
}
