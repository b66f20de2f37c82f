//! accumulating root spans for one logical session and flushing them
//! exactly once, when the last active thread finishes.
use crate::error::TraceResult;
use crate::identity::{IdentityProvider, StackIdentity};
use crate::spans::SpanHandle;
use crate::stacks::ThreadStacks;
use crate::tracker::SpanTracker;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use std::time::Duration;
use tracing::debug;

/// Receives every flushed root batch. The append writer is the production
/// implementation; tests plug in [`MemoryReporter`].
pub trait Reporter: Send + Sync {
    fn report(&self, batch: Vec<SpanHandle>) -> TraceResult<()>;
}

struct BatchState {
    roots: Vec<SpanHandle>,
    active_threads: HashSet<ThreadId>,
}

struct CollectorInner {
    stacks: ThreadStacks,
    state: Mutex<BatchState>,
    reporter: Box<dyn Reporter>,
    identity: Box<dyn IdentityProvider>,
}

/// Owns the root batch of one logical session and the bookkeeping deciding
/// when that batch is complete.
///
/// Cloning is cheap and yields another handle on the same collector.
#[derive(Clone)]
pub struct SpanCollector {
    inner: Arc<CollectorInner>,
}

impl SpanCollector {
    /// A collector flushing to `reporter`, resolving caller identities from
    /// the call stack.
    pub fn new<R: Reporter + 'static>(reporter: R) -> SpanCollector {
        SpanCollector::with_identity(reporter, StackIdentity)
    }

    pub fn with_identity<R, I>(reporter: R, identity: I) -> SpanCollector
    where
        R: Reporter + 'static,
        I: IdentityProvider + 'static,
    {
        SpanCollector {
            inner: Arc::new(CollectorInner {
                stacks: ThreadStacks::new(),
                state: Mutex::new(BatchState {
                    roots: Vec::new(),
                    active_threads: HashSet::new(),
                }),
                reporter: Box::new(reporter),
                identity: Box::new(identity),
            }),
        }
    }

    /// Open a root-level tracker named after the resolved caller.
    pub fn track(&self) -> TraceResult<SpanTracker> {
        let identity = self.inner.identity.resolve_caller()?;
        self.track_named(&identity.class_name, &identity.method_name)
    }

    /// Open a root-level tracker with an explicit identity.
    pub fn track_named(&self, class_name: &str, method_name: &str) -> TraceResult<SpanTracker> {
        SpanTracker::open(self, None, class_name, method_name)
    }

    /// Idempotent start: the first start stamps the record, later ones
    /// return it unchanged. The first call from a thread marks that thread
    /// active until its stack empties again.
    pub fn start(&self, span: &SpanHandle, thread: ThreadId) -> SpanHandle {
        self.inner
            .state
            .lock()
            .unwrap()
            .active_threads
            .insert(thread);
        span.start()
    }

    /// Idempotent stop, fixing the execution duration on first call.
    pub fn stop(&self, span: &SpanHandle) -> SpanHandle {
        span.stop()
    }

    /// File a completed span built elsewhere: under the span currently open
    /// on its thread, or as a new root when that thread has none.
    pub fn register_result(&self, span: &SpanHandle) {
        match self.inner.stacks.top(span.origin_thread()) {
            Some(open) => open.push_child(span),
            None => self.inner.state.lock().unwrap().roots.push(span.clone()),
        }
    }

    /// Build a completed span from externally measured timing and file it.
    pub fn register_timed(
        &self,
        class_name: &str,
        method_name: &str,
        start_time: DateTime<Utc>,
        execution_time: Duration,
    ) -> TraceResult<SpanHandle> {
        let span = SpanHandle::completed(class_name, method_name, start_time, execution_time)?;
        self.register_result(&span);
        Ok(span)
    }

    pub(crate) fn identity(&self) -> &dyn IdentityProvider {
        self.inner.identity.as_ref()
    }

    pub(crate) fn stacks(&self) -> &ThreadStacks {
        &self.inner.stacks
    }

    pub(crate) fn add_root(&self, span: &SpanHandle) {
        self.inner.state.lock().unwrap().roots.push(span.clone());
    }

    /// Account for one finished thread. When the last active thread
    /// finishes, the batch is swapped out under the state lock and handed to
    /// the reporter after releasing it, so a start racing this flush either
    /// made it into the old batch or cleanly opens the next one.
    pub(crate) fn thread_done(&self, thread: ThreadId) -> TraceResult<()> {
        let flushed = {
            let mut state = self.inner.state.lock().unwrap();
            state.active_threads.remove(&thread);
            if state.active_threads.is_empty() {
                Some(std::mem::replace(&mut state.roots, Vec::new()))
            } else {
                None
            }
        };
        if let Some(batch) = flushed {
            debug!(spans = batch.len(), "flushing root batch");
            self.inner.reporter.report(batch)?;
        }
        Ok(())
    }
}

/// Keeps every flushed batch in memory for later inspection.
#[derive(Clone, Default)]
pub struct MemoryReporter {
    batches: Arc<Mutex<Vec<Vec<SpanHandle>>>>,
}

impl MemoryReporter {
    pub fn new() -> MemoryReporter {
        MemoryReporter::default()
    }

    /// All batches flushed so far, in flush order.
    pub fn batches(&self) -> Vec<Vec<SpanHandle>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn flush_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

impl Reporter for MemoryReporter {
    fn report(&self, batch: Vec<SpanHandle>) -> TraceResult<()> {
        self.batches.lock().unwrap().push(batch);
        Ok(())
    }
}
