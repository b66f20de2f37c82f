//! per-thread stacks of open spans, kept in one shared map.
//! every thread only ever pushes and pops its own stack, so the map lock
//! is held for single operations and never across a span's lifetime.
use crate::spans::SpanHandle;
use std::collections::HashMap;
use std::sync::Mutex;
use std::thread::ThreadId;

#[derive(Debug, Default)]
pub(crate) struct ThreadStacks {
    stacks: Mutex<HashMap<ThreadId, Vec<SpanHandle>>>,
}

impl ThreadStacks {
    pub(crate) fn new() -> Self {
        ThreadStacks {
            stacks: Mutex::new(HashMap::new()),
        }
    }

    /// Push `span` onto `thread`'s stack, creating the stack on first use.
    ///
    /// Returns false without pushing when the stack top already is this very
    /// record: a second start inside one scope must not nest a phantom frame.
    pub(crate) fn push(&self, thread: ThreadId, span: &SpanHandle) -> bool {
        let mut stacks = self.stacks.lock().unwrap();
        let stack = stacks.entry(thread).or_insert_with(Vec::new);
        if stack
            .last()
            .map(|top| top.same_record(span))
            .unwrap_or(false)
        {
            return false;
        }
        stack.push(span.clone());
        true
    }

    /// Currently open span at the top of `thread`'s stack.
    pub(crate) fn top(&self, thread: ThreadId) -> Option<SpanHandle> {
        self.stacks
            .lock()
            .unwrap()
            .get(&thread)
            .and_then(|stack| stack.last())
            .cloned()
    }

    /// Pop the top of `thread`'s stack. The stack's map entry is removed as
    /// soon as it empties.
    pub(crate) fn pop(&self, thread: ThreadId) -> Option<SpanHandle> {
        let mut stacks = self.stacks.lock().unwrap();
        let popped = stacks.get_mut(&thread).and_then(|stack| stack.pop());
        if stacks.get(&thread).map(|stack| stack.is_empty()).unwrap_or(false) {
            stacks.remove(&thread);
        }
        popped
    }

    /// Does `thread` have any open span left ?
    pub(crate) fn is_empty(&self, thread: ThreadId) -> bool {
        !self.stacks.lock().unwrap().contains_key(&thread)
    }
}
