//! Instruments nested method calls in concurrent programs, builds a call
//! tree of timing and metadata per logical root invocation, and persists
//! completed trees as append-only JSON.
//!
//! A [`SpanCollector`] owns the root batch of one logical session. Scoped
//! [`SpanTracker`]s open timed spans, nest on their thread's stack and link
//! across threads through an explicit parent. When the last thread with an
//! open span releases it, the batch goes to the collector's [`Reporter`],
//! usually an [`AppendWriter`] growing a JSON array file in place.

// error taxonomy
mod error;
pub use error::{TraceError, TraceResult};
// span records and their shared handles
mod spans;
pub use spans::{SpanHandle, SpanSnapshot};
// per-thread stacks of open spans
mod stacks;
// who called into the tracking entry points
mod identity;
pub use identity::{CallerIdentity, FixedIdentity, IdentityProvider, StackIdentity};
// span trees to JSON
mod encoder;
pub use encoder::{JsonEncoder, SpanEncoder};
// root batches and flush accounting
mod collector;
pub use collector::{MemoryReporter, Reporter, SpanCollector};
// scoped tracking handles
mod tracker;
pub use tracker::SpanTracker;
// append-only files
mod writer;
pub use writer::{AppendWriter, LogFile};

use itertools::Itertools;
use std::collections::HashMap;
use std::time::Duration;

/// Run `op` under a tracker opened on `collector` and close it afterwards.
pub fn traced<R, F: FnOnce(&SpanTracker) -> R>(
    collector: &SpanCollector,
    class_name: &str,
    method_name: &str,
    op: F,
) -> TraceResult<R> {
    let mut tracker = collector.track_named(class_name, method_name)?;
    let result = op(&tracker);
    tracker.close()?;
    Ok(result)
}

/// Aggregated timing of every span sharing one `class::method` name.
#[derive(Debug, Clone)]
pub struct MethodStats {
    pub name: String,
    pub calls: usize,
    pub total: Duration,
    pub average: Duration,
}

/// Fold a flushed batch into per-method call counts and durations,
/// sorted by method name.
pub fn stats(batch: &[SpanHandle]) -> Vec<MethodStats> {
    let mut durations: HashMap<String, Vec<Duration>> = HashMap::new();
    let mut pending: Vec<SpanHandle> = batch.to_vec();
    while let Some(span) = pending.pop() {
        let snapshot = span.snapshot();
        durations
            .entry(format!(
                "{}::{}",
                snapshot.class_name, snapshot.method_name
            ))
            .or_insert_with(Vec::new)
            .push(snapshot.execution_time.unwrap_or_default());
        pending.extend(snapshot.children);
    }

    durations
        .into_iter()
        .sorted_by(|(name1, _), (name2, _)| name1.cmp(name2))
        .map(|(name, spans)| {
            let total = spans.iter().sum::<Duration>();
            MethodStats {
                name,
                calls: spans.len(),
                average: total / spans.len() as u32,
                total,
            }
        })
        .collect()
}
