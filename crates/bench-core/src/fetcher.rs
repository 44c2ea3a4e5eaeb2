use crate::params::ParamError;
use crate::store::{RawTrace, TraceStore};
use crate::window::TraceWindow;
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// (trace id, segment id)
pub type SegmentKey = (String, String);

/// Raw segment documents keyed by trace and segment id.
pub type MergedSegments = BTreeMap<SegmentKey, String>;

/// Fold a fetched batch into `merged`. The first document seen for a key wins,
/// so merging a retried or repeated batch changes nothing.
pub fn merge_traces(merged: &mut MergedSegments, traces: &[RawTrace]) {
    for trace in traces {
        for segment in &trace.segments {
            merged
                .entry((trace.id.clone(), segment.id.clone()))
                .or_insert_with(|| segment.document.clone());
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub trace_ids: usize,
    pub batches: usize,
    /// Parsed documents, not yet checked for the benchmark shape
    pub documents: Vec<Value>,
}

/// Pulls every benchmark trace in a window out of a [`TraceStore`].
pub struct TraceFetcher<'a> {
    store: &'a dyn TraceStore,
    batch_size: usize,
    filter: String,
}

impl<'a> TraceFetcher<'a> {
    pub fn new(
        store: &'a dyn TraceStore,
        batch_size: usize,
        filter: impl Into<String>,
    ) -> Result<Self, ParamError> {
        if batch_size == 0 {
            return Err(ParamError::BatchSize);
        }
        Ok(Self {
            store,
            batch_size,
            filter: filter.into(),
        })
    }

    /// Fetch every segment of every matching trace in `window` and parse it as JSON.
    ///
    /// Any failed batch or document that is not JSON fails the whole fetch; a
    /// partial window would silently bias the statistics. The document shape is
    /// only checked later, for segments that carry the benchmark marker.
    pub async fn fetch(&self, window: &TraceWindow) -> Result<FetchOutcome> {
        let ids: BTreeSet<String> = self
            .store
            .trace_ids(window, &self.filter)
            .await
            .with_context(|| format!("Failed to list traces from {}", self.store.name()))?
            .into_iter()
            .collect();
        let ids: Vec<String> = ids.into_iter().collect();
        info!(
            "Found {} traces between {} and {}",
            ids.len(),
            window.start,
            window.end
        );

        let mut merged = MergedSegments::new();
        let mut batches = 0;
        for batch in ids.chunks(self.batch_size) {
            let traces = self
                .store
                .batch_get(batch)
                .await
                .with_context(|| format!("Failed to fetch trace batch {batches}: {batch:?}"))?;
            merge_traces(&mut merged, &traces);
            batches += 1;
        }
        debug!("Fetched {} segments in {} batches", merged.len(), batches);

        let documents = merged
            .into_iter()
            .map(|((trace_id, segment_id), document)| -> Result<Value> {
                let mut doc: Value = serde_json::from_str(&document).with_context(|| {
                    format!("Failed to parse segment {segment_id} of trace {trace_id}")
                })?;
                if let Some(fields) = doc.as_object_mut() {
                    fields
                        .entry("trace_id")
                        .or_insert_with(|| Value::String(trace_id));
                }
                Ok(doc)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(FetchOutcome {
            trace_ids: ids.len(),
            batches,
            documents,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryTraceStore, RawSegment};
    use chrono::Utc;
    use std::time::Duration;

    fn trace(n: usize) -> RawTrace {
        let trace_id = format!("1-{n:08x}");
        RawTrace {
            id: trace_id.clone(),
            segments: vec![RawSegment {
                id: format!("seg{n}"),
                document: serde_json::json!({
                    "id": format!("seg{n}"),
                    "trace_id": trace_id,
                    "name": "sqs_benchmark",
                    "start_time": 1.0,
                    "end_time": 1.5,
                    "annotations": {"service": "sqs", "scope": "benchmark"}
                })
                .to_string(),
            }],
        }
    }

    fn window() -> TraceWindow {
        TraceWindow::resolve_at(Utc::now(), Duration::from_secs(60), 0.0).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_batches_of_at_most_five() {
        let store = InMemoryTraceStore::new((0..12).map(trace).collect());
        let fetcher = TraceFetcher::new(&store, 5, "annotation.scope = \"benchmark\"").unwrap();

        let outcome = fetcher.fetch(&window()).await.unwrap();

        assert_eq!(outcome.trace_ids, 12);
        assert_eq!(outcome.batches, 3);
        assert_eq!(outcome.documents.len(), 12);
        let sizes: Vec<usize> = store.batches().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![5, 5, 2]);
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_fetched_once() {
        let store = InMemoryTraceStore::new(vec![trace(1), trace(1), trace(2)]);
        let fetcher = TraceFetcher::new(&store, 5, "").unwrap();

        let outcome = fetcher.fetch(&window()).await.unwrap();

        assert_eq!(outcome.trace_ids, 2);
        assert_eq!(outcome.documents.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_batch_fails_the_fetch() {
        let store = InMemoryTraceStore::new((0..8).map(trace).collect()).fail_on(trace(6).id);
        let fetcher = TraceFetcher::new(&store, 5, "").unwrap();

        let err = fetcher.fetch(&window()).await.unwrap_err();
        assert!(format!("{err:#}").contains("batch 1"), "{err:#}");
    }

    #[tokio::test]
    async fn test_unparsable_document_fails_the_fetch() {
        let mut bad = trace(3);
        bad.segments[0].document = "{not json".to_string();
        let store = InMemoryTraceStore::new(vec![trace(1), bad]);
        let fetcher = TraceFetcher::new(&store, 5, "").unwrap();

        assert!(fetcher.fetch(&window()).await.is_err());
    }

    #[tokio::test]
    async fn test_foreign_segment_shape_does_not_fail_the_fetch() {
        let mut traced = trace(4);
        traced.segments.push(RawSegment {
            id: "sdk".to_string(),
            document: r#"{"id": 7, "name": "Overhead", "subsegments": []}"#.to_string(),
        });
        let store = InMemoryTraceStore::new(vec![traced]);
        let fetcher = TraceFetcher::new(&store, 5, "").unwrap();

        let outcome = fetcher.fetch(&window()).await.unwrap();

        assert_eq!(outcome.documents.len(), 2);
        assert!(outcome
            .documents
            .iter()
            .all(|doc| doc["trace_id"] == trace(4).id.as_str()));
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let store = InMemoryTraceStore::default();
        assert!(TraceFetcher::new(&store, 0, "").is_err());
    }

    #[test]
    fn test_first_document_wins() {
        let first = trace(1);
        let mut second = trace(1);
        second.segments[0].document = "later".to_string();

        let mut merged = MergedSegments::new();
        merge_traces(&mut merged, &[first.clone()]);
        merge_traces(&mut merged, &[second]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged.values().next(), Some(&first.segments[0].document));
    }
}
