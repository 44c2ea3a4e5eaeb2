use crate::window::TraceWindow;
use anyhow::{Context, Result};
use aws_config::SdkConfig;
use aws_sdk_xray::primitives::DateTime as XrayDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Mutex;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// One segment as stored: its id and the serialized segment document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSegment {
    pub id: String,
    pub document: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTrace {
    pub id: String,
    pub segments: Vec<RawSegment>,
}

/// Read access to the distributed trace store.
pub trait TraceStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Ids of every trace matching `filter` within `window`, across all pages.
    fn trace_ids<'a>(
        &'a self,
        window: &'a TraceWindow,
        filter: &'a str,
    ) -> StoreFuture<'a, Vec<String>>;

    /// Full traces for a batch of ids.
    fn batch_get<'a>(&'a self, ids: &'a [String]) -> StoreFuture<'a, Vec<RawTrace>>;
}

/// AWS X-Ray backed store.
pub struct XrayTraceStore {
    client: aws_sdk_xray::Client,
}

impl XrayTraceStore {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_xray::Client::new(config),
        }
    }
}

fn to_xray_time(t: &chrono::DateTime<chrono::Utc>) -> XrayDateTime {
    XrayDateTime::from_millis(t.timestamp_millis())
}

impl TraceStore for XrayTraceStore {
    fn name(&self) -> &'static str {
        "xray"
    }

    fn trace_ids<'a>(
        &'a self,
        window: &'a TraceWindow,
        filter: &'a str,
    ) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async move {
            let mut pages = self
                .client
                .get_trace_summaries()
                .start_time(to_xray_time(&window.start))
                .end_time(to_xray_time(&window.end))
                .filter_expression(filter)
                .into_paginator()
                .send();

            let mut ids = Vec::new();
            while let Some(page) = pages.next().await {
                let page = page.context("get trace summaries")?;
                ids.extend(
                    page.trace_summaries()
                        .iter()
                        .filter_map(|t| t.id().map(str::to_string)),
                );
            }
            Ok(ids)
        })
    }

    fn batch_get<'a>(&'a self, ids: &'a [String]) -> StoreFuture<'a, Vec<RawTrace>> {
        Box::pin(async move {
            let mut pages = self
                .client
                .batch_get_traces()
                .set_trace_ids(Some(ids.to_vec()))
                .into_paginator()
                .send();

            let mut traces = Vec::new();
            while let Some(page) = pages.next().await {
                let page = page.with_context(|| format!("batch get traces {ids:?}"))?;
                for trace in page.traces() {
                    let Some(id) = trace.id() else { continue };
                    let segments = trace
                        .segments()
                        .iter()
                        .filter_map(|s| {
                            Some(RawSegment {
                                id: s.id()?.to_string(),
                                document: s.document()?.to_string(),
                            })
                        })
                        .collect();
                    traces.push(RawTrace {
                        id: id.to_string(),
                        segments,
                    });
                }
            }
            Ok(traces)
        })
    }
}

/// Store over a fixed set of traces, for tests and offline replay.
///
/// Ignores the window and filter. Batches containing an id marked with
/// [`InMemoryTraceStore::fail_on`] fail.
#[derive(Default)]
pub struct InMemoryTraceStore {
    traces: Vec<RawTrace>,
    failing: HashSet<String>,
    batches: Mutex<Vec<Vec<String>>>,
}

impl InMemoryTraceStore {
    pub fn new(traces: Vec<RawTrace>) -> Self {
        Self {
            traces,
            ..Default::default()
        }
    }

    /// Load a JSON array of traces.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read traces from {:?}", path))?;
        let traces: Vec<RawTrace> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse traces in {:?}", path))?;
        Ok(Self::new(traces))
    }

    pub fn fail_on(mut self, trace_id: impl Into<String>) -> Self {
        self.failing.insert(trace_id.into());
        self
    }

    /// Batches requested so far, in order.
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().map(|b| b.clone()).unwrap_or_default()
    }
}

impl TraceStore for InMemoryTraceStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn trace_ids<'a>(
        &'a self,
        _window: &'a TraceWindow,
        _filter: &'a str,
    ) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async move { Ok(self.traces.iter().map(|t| t.id.clone()).collect()) })
    }

    fn batch_get<'a>(&'a self, ids: &'a [String]) -> StoreFuture<'a, Vec<RawTrace>> {
        Box::pin(async move {
            if let Ok(mut batches) = self.batches.lock() {
                batches.push(ids.to_vec());
            }
            if let Some(bad) = ids.iter().find(|id| self.failing.contains(*id)) {
                anyhow::bail!("batch containing {bad} failed");
            }
            Ok(self
                .traces
                .iter()
                .filter(|t| ids.contains(&t.id))
                .cloned()
                .collect())
        })
    }
}
