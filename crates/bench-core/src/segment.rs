use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A segment document as emitted by a delivery-path consumer.
///
/// Only the fields needed for latency measurement are kept; everything else in
/// the document is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentDocument {
    pub id: String,
    #[serde(default)]
    pub trace_id: String,
    pub name: String,
    pub start_time: f64,
    /// Absent while the segment is still in progress
    #[serde(default)]
    pub end_time: Option<f64>,
    #[serde(default)]
    pub annotations: BTreeMap<String, Value>,
}

impl SegmentDocument {
    pub fn parse(document: &str) -> serde_json::Result<Self> {
        serde_json::from_str(document)
    }

    pub fn from_value(document: &Value) -> serde_json::Result<Self> {
        Self::deserialize(document)
    }
}

/// A closed segment with its duration and its annotations flattened into fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedSegment {
    pub id: String,
    pub trace_id: String,
    pub name: String,
    pub start_time: f64,
    pub end_time: f64,
    /// Seconds; negative when host clocks disagree
    pub duration: f64,
    /// Delivery path label, from the `service` annotation
    pub service: Option<String>,
    /// Every other annotation
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    pub segments: Vec<ProcessedSegment>,
    /// Segments whose name lacks the benchmark marker
    pub unmarked: usize,
    /// Benchmark segments without an end time
    pub in_progress: usize,
}

fn annotation_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Compute the duration and flatten annotations of one segment.
///
/// Annotation keys overwrite same-named fields. Returns `None` for a segment
/// that has not been closed yet.
pub fn process_segment(doc: &SegmentDocument) -> Option<ProcessedSegment> {
    let end_time = doc.end_time?;
    let mut segment = ProcessedSegment {
        id: doc.id.clone(),
        trace_id: doc.trace_id.clone(),
        name: doc.name.clone(),
        start_time: doc.start_time,
        end_time,
        duration: end_time - doc.start_time,
        service: None,
        extra: BTreeMap::new(),
    };

    for (key, value) in &doc.annotations {
        let text = annotation_text(value);
        let number = value.as_f64().or_else(|| text.parse::<f64>().ok());
        match (key.as_str(), number) {
            ("service", _) => segment.service = Some(text),
            ("id", _) => segment.id = text,
            ("trace_id", _) => segment.trace_id = text,
            ("name", _) => segment.name = text,
            ("start_time", Some(n)) => segment.start_time = n,
            ("end_time", Some(n)) => segment.end_time = n,
            ("duration", Some(n)) => segment.duration = n,
            _ => {
                segment.extra.insert(key.clone(), text);
            }
        }
    }
    Some(segment)
}

/// Keep the documents whose name contains `marker` and process them.
///
/// Only `name` is read from unmarked documents, so other instrumentation in
/// the same trace may have any shape. A marked document that is not a valid
/// segment is an error.
pub fn process_segments<'a, I>(docs: I, marker: &str) -> Result<ProcessOutcome>
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut outcome = ProcessOutcome::default();
    for doc in docs {
        let name = doc
            .get("name")
            .and_then(Value::as_str)
            .with_context(|| format!("Segment document has no name: {doc}"))?;
        if !name.contains(marker) {
            outcome.unmarked += 1;
            continue;
        }
        let doc = SegmentDocument::from_value(doc)
            .with_context(|| format!("Malformed benchmark segment {name:?}"))?;
        match process_segment(&doc) {
            Some(segment) => outcome.segments.push(segment),
            None => outcome.in_progress += 1,
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(name: &str, start: f64, end: Option<f64>, annotations: Value) -> Value {
        let mut value = json!({
            "id": "seg-1",
            "trace_id": "1-abc-def",
            "name": name,
            "start_time": start,
            "annotations": annotations,
        });
        if let Some(end) = end {
            value["end_time"] = json!(end);
        }
        value
    }

    fn doc(name: &str, start: f64, end: Option<f64>, annotations: Value) -> SegmentDocument {
        SegmentDocument::from_value(&raw(name, start, end, annotations)).unwrap()
    }

    #[test]
    fn test_parse_xray_document() {
        let raw = r#"{
            "id": "6226467e3f845502",
            "name": "sqs_benchmark",
            "start_time": 1548878446.134,
            "trace_id": "1-5c51c6a0-3fbb7b5c9e4f7c3c5a4d1e2f",
            "end_time": 1548878446.213,
            "parent_id": "53995c3f42cd8ad8",
            "annotations": {"scope": "benchmark", "service": "sqs"},
            "aws": {"xray": {"sdk": "X-Ray for Python"}}
        }"#;
        let doc = SegmentDocument::parse(raw).unwrap();
        assert_eq!(doc.name, "sqs_benchmark");
        assert_eq!(doc.end_time, Some(1548878446.213));
        assert_eq!(doc.annotations["service"], json!("sqs"));
    }

    #[test]
    fn test_duration_and_flatten() {
        let d = doc(
            "sns_benchmark",
            10.0,
            Some(10.25),
            json!({"scope": "benchmark", "service": "sns", "shards": 5}),
        );
        let s = process_segment(&d).unwrap();
        assert_eq!(s.duration, 0.25);
        assert_eq!(s.service.as_deref(), Some("sns"));
        assert_eq!(s.extra["scope"], "benchmark");
        assert_eq!(s.extra["shards"], "5");
        assert!(!s.extra.contains_key("service"));
    }

    #[test]
    fn test_negative_duration_is_not_clamped() {
        let d = doc("kinesis_benchmark", 5.0, Some(4.5), json!({"service": "kinesis"}));
        assert_eq!(process_segment(&d).unwrap().duration, -0.5);
    }

    #[test]
    fn test_annotations_overwrite_fields() {
        let d = doc("sqs_benchmark", 1.0, Some(2.0), json!({"name": "renamed", "id": "x"}));
        let s = process_segment(&d).unwrap();
        assert_eq!(s.name, "renamed");
        assert_eq!(s.id, "x");
        assert_eq!(s.service, None);
    }

    #[test]
    fn test_processing_is_pure() {
        let d = doc("sqs_benchmark", 1.0, Some(3.5), json!({"service": "sqs"}));
        assert_eq!(process_segment(&d), process_segment(&d));
        assert_eq!(d.end_time, Some(3.5));
    }

    #[test]
    fn test_filters_by_marker_and_skips_in_progress() {
        let docs = vec![
            raw("sqs_benchmark", 1.0, Some(2.0), json!({"service": "sqs"})),
            raw("fanout", 0.0, Some(1.0), json!({})),
            raw("dynamodb_benchmark", 1.0, None, json!({"service": "dynamodb"})),
        ];
        let outcome = process_segments(&docs, "_benchmark").unwrap();
        assert_eq!(outcome.segments.len(), 1);
        assert_eq!(outcome.unmarked, 1);
        assert_eq!(outcome.in_progress, 1);
    }

    #[test]
    fn test_unmarked_documents_may_have_any_shape() {
        let docs = vec![
            raw("sns_benchmark", 1.0, Some(1.5), json!({"service": "sns"})),
            json!({"id": 42, "name": "Overhead", "in_progress": true}),
        ];
        let outcome = process_segments(&docs, "_benchmark").unwrap();
        assert_eq!(outcome.segments.len(), 1);
        assert_eq!(outcome.unmarked, 1);
    }

    #[test]
    fn test_malformed_benchmark_segment_is_an_error() {
        let docs = vec![json!({"id": "s", "name": "sqs_benchmark", "end_time": 2.0})];
        assert!(process_segments(&docs, "_benchmark").is_err());

        let nameless = vec![json!({"id": "s", "start_time": 1.0})];
        assert!(process_segments(&nameless, "_benchmark").is_err());
    }
}
