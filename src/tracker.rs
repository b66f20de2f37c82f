//! scoped tracking handles: open a span on creation, close it on release.
use crate::collector::SpanCollector;
use crate::error::{TraceError, TraceResult};
use crate::spans::SpanHandle;
use std::collections::HashMap;
use std::thread::ThreadId;
use std::time::Duration;
use tracing::warn;

/// A scoped handle on one open span.
///
/// Opening a tracker starts its span and links it under whatever is already
/// open: the top of the current thread's stack for ordinary nesting, or an
/// explicitly supplied parent when work was spawned onto another thread.
/// Releasing it stops the span and, once the thread's stack is empty again,
/// tells the collector this thread is done.
pub struct SpanTracker {
    collector: SpanCollector,
    span: SpanHandle,
    thread: ThreadId,
    pushed: bool,
    closed: bool,
}

impl SpanTracker {
    pub(crate) fn open(
        collector: &SpanCollector,
        parent: Option<&SpanHandle>,
        class_name: &str,
        method_name: &str,
    ) -> TraceResult<SpanTracker> {
        let thread = std::thread::current().id();
        let span = SpanHandle::new(class_name, method_name)?;
        // activate this thread before the span becomes reachable, so a
        // flush on another thread can never carry a span that is still open.
        collector.start(&span, thread);
        let nesting_parent = match parent {
            // spawned onto a foreign thread: link straight into the parent,
            // the new span starts this thread's own stack.
            Some(remote) if remote.origin_thread() != thread => Some(remote.clone()),
            _ => collector.stacks().top(thread).or_else(|| parent.cloned()),
        };
        match &nesting_parent {
            Some(open) => open.push_child(&span),
            None => collector.add_root(&span),
        }
        let pushed = collector.stacks().push(thread, &span);
        Ok(SpanTracker {
            collector: collector.clone(),
            span,
            thread,
            pushed,
            closed: false,
        })
    }

    /// Open a tracker under this one, named after the resolved caller.
    pub fn child(&self) -> TraceResult<SpanTracker> {
        let identity = self.collector.identity().resolve_caller()?;
        SpanTracker::open(
            &self.collector,
            Some(&self.span),
            &identity.class_name,
            &identity.method_name,
        )
    }

    /// Open a tracker under this one with an explicit identity.
    pub fn child_named(&self, class_name: &str, method_name: &str) -> TraceResult<SpanTracker> {
        SpanTracker::open(&self.collector, Some(&self.span), class_name, method_name)
    }

    pub fn add_metadata(&self, key: &str, value: &str) {
        self.span.add_metadata(key, value);
    }

    pub fn merge_metadata(&self, entries: &HashMap<String, String>) {
        self.span.merge_metadata(entries);
    }

    /// Time elapsed since this tracker's span started.
    pub fn elapsed(&self) -> TraceResult<Duration> {
        self.span.elapsed()
    }

    /// The tracked span.
    pub fn handle(&self) -> &SpanHandle {
        &self.span
    }

    /// Release this tracker: stop the span, pop it off the thread's stack
    /// and, if that emptied the stack, account for the finished thread on
    /// the collector (which flushes once the last thread is done).
    ///
    /// Closing twice is a no-op after the first call.
    pub fn close(&mut self) -> TraceResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.collector.stop(&self.span);
        if !self.pushed {
            // frame was reused, its owner pops it.
            return Ok(());
        }
        match self.collector.stacks().pop(self.thread) {
            Some(open) if open.same_record(&self.span) => {}
            _ => {
                return Err(TraceError::Tracking(format!(
                    "{}::{} released out of order",
                    self.span.snapshot().class_name,
                    self.span.snapshot().method_name,
                )))
            }
        }
        if self.collector.stacks().is_empty(self.thread) {
            self.collector.thread_done(self.thread)?;
        }
        Ok(())
    }
}

impl Drop for SpanTracker {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(error) = self.close() {
                warn!(%error, "closing tracker during drop failed");
            }
        }
    }
}
