use crate::segment::ProcessedSegment;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::info;

const MILLIS_PER_SECOND: f64 = 1000.0;

/// Latency summary for one delivery path. Latencies are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsRow {
    pub service: String,
    pub count: u64,
    pub mean: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsReport {
    /// One row per service, ordered by service name
    pub rows: Vec<StatsRow>,
    /// Segments dropped for a zero or negative duration
    pub discarded_non_positive: u64,
    /// Segments dropped for lacking a `service` annotation
    pub unlabeled: u64,
}

impl StatsReport {
    /// No measurable deliveries in the window.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, service: &str) -> Option<&StatsRow> {
        self.rows.iter().find(|r| r.service == service)
    }
}

/// Percentile of sorted values by linear interpolation between closest ranks.
pub fn percentile(sorted: &[f64], q: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let rank = q.clamp(0.0, 1.0) * last as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let (a, b) = (sorted[lo], sorted[hi]);
    Some(a + (b - a) * (rank - lo as f64))
}

fn summarize(service: String, mut durations: Vec<f64>) -> Option<StatsRow> {
    durations.sort_by(f64::total_cmp);
    let count = durations.len();
    let mean = durations.iter().sum::<f64>() / count as f64;
    let ms = |q: f64| percentile(&durations, q).map(|v| v * MILLIS_PER_SECOND);
    Some(StatsRow {
        service,
        count: count as u64,
        mean: mean * MILLIS_PER_SECOND,
        p50: ms(0.50)?,
        p75: ms(0.75)?,
        p90: ms(0.90)?,
        p95: ms(0.95)?,
    })
}

/// Group segment durations by service and summarize each group.
///
/// Durations that are not strictly positive are instrumentation noise and are
/// dropped (and counted) before grouping.
pub fn aggregate<'a, I>(segments: I) -> StatsReport
where
    I: IntoIterator<Item = &'a ProcessedSegment>,
{
    let mut report = StatsReport::default();
    let mut groups: BTreeMap<String, Vec<f64>> = BTreeMap::new();

    for segment in segments {
        if !(segment.duration > 0.0) {
            report.discarded_non_positive += 1;
            continue;
        }
        match &segment.service {
            Some(service) => groups
                .entry(service.clone())
                .or_default()
                .push(segment.duration),
            None => report.unlabeled += 1,
        }
    }

    if report.discarded_non_positive > 0 {
        info!(
            "Discarded {} segments with non-positive duration",
            report.discarded_non_positive
        );
    }

    report.rows = groups
        .into_iter()
        .filter_map(|(service, durations)| summarize(service, durations))
        .collect();
    report
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "No measurable deliveries");
        }
        writeln!(
            f,
            "{:<12} {:>8} {:>10} {:>10} {:>10} {:>10} {:>10}",
            "service", "count", "mean", "p50", "p75", "p90", "p95"
        )?;
        for r in &self.rows {
            writeln!(
                f,
                "{:<12} {:>8} {:>10.2} {:>10.2} {:>10.2} {:>10.2} {:>10.2}",
                r.service, r.count, r.mean, r.p50, r.p75, r.p90, r.p95
            )?;
        }
        Ok(())
    }
}
