//! turning span trees into JSON documents.
use crate::error::{TraceError, TraceResult};
use crate::spans::SpanHandle;
use chrono::SecondsFormat;
use serde::Serialize;
use std::collections::HashMap;

/// Serializes a batch of span trees to one JSON array.
pub trait SpanEncoder: Send + Sync {
    fn encode(&self, batch: &[SpanHandle]) -> TraceResult<Vec<u8>>;
}

/// The default serde-backed encoder.
#[derive(Debug, Default)]
pub struct JsonEncoder;

/// Serializable view over a span tree. Children are walked recursively,
/// the parent link never.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpanView {
    class_name: String,
    method_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    execution_time: Option<f64>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    metadata: HashMap<String, String>,
    sub_methods: Vec<SpanView>,
}

impl SpanView {
    fn from_span(span: &SpanHandle) -> SpanView {
        let snapshot = span.snapshot();
        SpanView {
            class_name: snapshot.class_name,
            method_name: snapshot.method_name,
            start_time: snapshot
                .start_time
                .map(|time| time.to_rfc3339_opts(SecondsFormat::Micros, true)),
            execution_time: snapshot
                .execution_time
                .map(|duration| duration.as_secs_f64() * 1_000.0),
            metadata: snapshot.metadata,
            sub_methods: snapshot.children.iter().map(SpanView::from_span).collect(),
        }
    }
}

impl SpanEncoder for JsonEncoder {
    fn encode(&self, batch: &[SpanHandle]) -> TraceResult<Vec<u8>> {
        let views: Vec<SpanView> = batch.iter().map(SpanView::from_span).collect();
        serde_json::to_vec(&views)
            .map_err(|error| TraceError::Other(Box::new(error)))
    }
}
