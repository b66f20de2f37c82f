//! span records and the shared handles through which they are reached.
use crate::error::{TraceError, TraceResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

/// One timed invocation node.
#[derive(Debug)]
pub(crate) struct SpanRecord {
    class_name: String,
    method_name: String,
    start_time: Option<DateTime<Utc>>,
    started_at: Option<Instant>,
    execution_time: Option<Duration>,
    metadata: HashMap<String, String>,
    children: Vec<SpanHandle>,
    // non-owning, for lookups only. never serialized.
    parent: Option<Weak<Mutex<SpanRecord>>>,
    origin_thread: ThreadId,
}

/// Shared, cloneable handle on a [`SpanRecord`].
///
/// Trackers on several threads may hold handles on the same record;
/// all field access goes through the record's lock.
#[derive(Debug, Clone)]
pub struct SpanHandle {
    inner: Arc<Mutex<SpanRecord>>,
}

/// A consistent copy of a record's fields, taken under its lock.
#[derive(Debug, Clone)]
pub struct SpanSnapshot {
    pub class_name: String,
    pub method_name: String,
    pub start_time: Option<DateTime<Utc>>,
    pub execution_time: Option<Duration>,
    pub metadata: HashMap<String, String>,
    pub children: Vec<SpanHandle>,
}

impl SpanHandle {
    /// Create a fresh, unstarted record for the calling thread.
    pub fn new(class_name: &str, method_name: &str) -> TraceResult<SpanHandle> {
        if class_name.trim().is_empty() {
            return Err(TraceError::InvalidArgument("class name must not be empty"));
        }
        if method_name.trim().is_empty() {
            return Err(TraceError::InvalidArgument("method name must not be empty"));
        }
        Ok(SpanHandle {
            inner: Arc::new(Mutex::new(SpanRecord {
                class_name: class_name.to_string(),
                method_name: method_name.to_string(),
                start_time: None,
                started_at: None,
                execution_time: None,
                metadata: HashMap::new(),
                children: Vec::new(),
                parent: None,
                origin_thread: std::thread::current().id(),
            })),
        })
    }

    /// Create a record whose timing is already known, e.g. measured by a collaborator.
    pub fn completed(
        class_name: &str,
        method_name: &str,
        start_time: DateTime<Utc>,
        execution_time: Duration,
    ) -> TraceResult<SpanHandle> {
        let span = SpanHandle::new(class_name, method_name)?;
        {
            let mut record = span.inner.lock().unwrap();
            record.start_time = Some(start_time);
            record.execution_time = Some(execution_time);
        }
        Ok(span)
    }

    /// Mark the record started. Starting an already started record is a
    /// no-op returning the record unchanged.
    pub fn start(&self) -> SpanHandle {
        let mut record = self.inner.lock().unwrap();
        if record.start_time.is_none() {
            record.start_time = Some(Utc::now());
            record.started_at = Some(Instant::now());
        }
        self.clone()
    }

    /// Mark the record stopped, fixing its execution duration. Stopping an
    /// already stopped record is a no-op returning the record unchanged.
    pub fn stop(&self) -> SpanHandle {
        let mut record = self.inner.lock().unwrap();
        if record.execution_time.is_none() {
            record.execution_time = Some(
                record
                    .started_at
                    .map(|started| started.elapsed())
                    .unwrap_or_default(),
            );
        }
        self.clone()
    }

    pub fn started(&self) -> bool {
        self.inner.lock().unwrap().start_time.is_some()
    }

    pub fn stopped(&self) -> bool {
        self.inner.lock().unwrap().execution_time.is_some()
    }

    /// Time elapsed since the record started.
    pub fn elapsed(&self) -> TraceResult<Duration> {
        self.inner
            .lock()
            .unwrap()
            .started_at
            .map(|started| started.elapsed())
            .ok_or(TraceError::InvalidState("span has not started"))
    }

    /// Merge one key into the metadata map. Last write wins.
    pub fn add_metadata(&self, key: &str, value: &str) {
        self.inner
            .lock()
            .unwrap()
            .metadata
            .insert(key.to_string(), value.to_string());
    }

    /// Merge a whole map into the metadata map. Last write wins per key.
    pub fn merge_metadata(&self, entries: &HashMap<String, String>) {
        let mut record = self.inner.lock().unwrap();
        for (key, value) in entries {
            record.metadata.insert(key.clone(), value.clone());
        }
    }

    /// Append `child` to this record's child list and point the child's
    /// parent link back here.
    ///
    /// Sibling threads may append to the same parent concurrently; the
    /// record lock guarantees no append is lost or duplicated.
    pub fn push_child(&self, child: &SpanHandle) {
        self.inner.lock().unwrap().children.push(child.clone());
        child.inner.lock().unwrap().parent = Some(Arc::downgrade(&self.inner));
    }

    /// Parent record, if it is still alive.
    pub fn parent(&self) -> Option<SpanHandle> {
        self.inner
            .lock()
            .unwrap()
            .parent
            .as_ref()
            .and_then(|weak| weak.upgrade())
            .map(|inner| SpanHandle { inner })
    }

    pub fn origin_thread(&self) -> ThreadId {
        self.inner.lock().unwrap().origin_thread
    }

    /// Copy out the record's current fields in one locked read.
    pub fn snapshot(&self) -> SpanSnapshot {
        let record = self.inner.lock().unwrap();
        SpanSnapshot {
            class_name: record.class_name.clone(),
            method_name: record.method_name.clone(),
            start_time: record.start_time,
            execution_time: record.execution_time,
            metadata: record.metadata.clone(),
            children: record.children.clone(),
        }
    }

    /// Do both handles reach the same record ?
    pub fn same_record(&self, other: &SpanHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
