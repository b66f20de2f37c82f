//! multi-thread tracking sessions, from a single root to parallel fan-out.
use method_tracer::{MemoryReporter, SpanCollector, SpanHandle};
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

fn collector() -> (SpanCollector, MemoryReporter) {
    let reporter = MemoryReporter::new();
    (SpanCollector::new(reporter.clone()), reporter)
}

fn child_names(root: &SpanHandle) -> Vec<String> {
    root.snapshot()
        .children
        .iter()
        .map(|child| child.snapshot().method_name)
        .collect()
}

#[test]
fn a_released_root_flushes_a_batch_of_one() {
    let (collector, reporter) = collector();
    let mut root = collector.track_named("Session", "run").unwrap();
    root.close().unwrap();
    let batches = reporter.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);
    let snapshot = batches[0][0].snapshot();
    assert_eq!(snapshot.class_name, "Session");
    assert_eq!(snapshot.method_name, "run");
    assert!(snapshot.children.is_empty());
    assert!(batches[0][0].stopped());
}

#[test]
fn a_nested_child_lands_under_its_root() {
    let (collector, reporter) = collector();
    let mut root = collector.track_named("Session", "run").unwrap();
    let mut child = root.child_named("Session", "step").unwrap();
    child.close().unwrap();
    // the child alone must not flush: its thread still holds the root.
    assert_eq!(reporter.flush_count(), 0);
    root.close().unwrap();
    let batches = reporter.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);
    assert_eq!(child_names(&batches[0][0]), vec!["step"]);
}

#[test]
fn same_thread_children_keep_opening_order() {
    let (collector, reporter) = collector();
    let mut root = collector.track_named("Session", "run").unwrap();
    for index in 0..5 {
        let mut child = root
            .child_named("Session", &format!("step_{}", index))
            .unwrap();
        child.close().unwrap();
    }
    root.close().unwrap();
    assert_eq!(
        child_names(&reporter.batches()[0][0]),
        vec!["step_0", "step_1", "step_2", "step_3", "step_4"]
    );
}

#[test]
fn thirty_parallel_children_all_attach_to_the_root() {
    let (collector, reporter) = collector();
    let mut root = collector.track_named("Fanout", "run").unwrap();
    std::thread::scope(|scope| {
        let root = &root;
        for index in 0..30 {
            scope.spawn(move || {
                let mut child = root
                    .child_named("Fanout", &format!("task_{}", index))
                    .unwrap();
                child.close().unwrap();
            });
        }
    });
    root.close().unwrap();
    let batches = reporter.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);
    // exactly thirty children, none lost, none duplicated.
    let names = child_names(&batches[0][0]);
    assert_eq!(names.len(), 30);
    let distinct: HashSet<&String> = names.iter().collect();
    assert_eq!(distinct.len(), 30);
}

#[test]
fn spawned_children_can_nest_their_own_children() {
    let (collector, reporter) = collector();
    let mut root = collector.track_named("Fanout", "run").unwrap();
    std::thread::scope(|scope| {
        let root = &root;
        scope.spawn(move || {
            let mut child = root.child_named("Fanout", "task").unwrap();
            let mut grandchild = child.child_named("Fanout", "detail").unwrap();
            grandchild.close().unwrap();
            child.close().unwrap();
        });
    });
    root.close().unwrap();
    let root_span = &reporter.batches()[0][0];
    assert_eq!(child_names(root_span), vec!["task"]);
    let task = &root_span.snapshot().children[0];
    assert_eq!(child_names(task), vec!["detail"]);
}

#[test]
fn thirty_sequential_sessions_flush_thirty_batches() {
    let (collector, reporter) = collector();
    for index in 0..30 {
        let mut root = collector
            .track_named("Session", &format!("run_{}", index))
            .unwrap();
        root.close().unwrap();
    }
    let batches = reporter.batches();
    assert_eq!(batches.len(), 30);
    for (index, batch) in batches.iter().enumerate() {
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].snapshot().method_name, format!("run_{}", index));
    }
}

#[test]
fn no_flush_while_a_sibling_thread_still_holds_a_span() {
    let (collector, reporter) = collector();
    let root = Arc::new(collector.track_named("Session", "run").unwrap());
    let (opened_tx, opened_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let worker = {
        let root = root.clone();
        std::thread::spawn(move || {
            let mut child = root.child_named("Session", "background").unwrap();
            drop(root);
            opened_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            child.close().unwrap();
        })
    };
    opened_rx.recv().unwrap();
    let mut root = Arc::try_unwrap(root).ok().expect("worker released its handle");
    // the sibling thread still holds an open span: releasing the root alone
    // must not flush.
    root.close().unwrap();
    assert_eq!(reporter.flush_count(), 0);
    release_tx.send(()).unwrap();
    worker.join().unwrap();
    let batches = reporter.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(child_names(&batches[0][0]), vec!["background"]);
}

#[test]
fn rayon_fan_out_with_jittered_workloads() {
    let (collector, reporter) = collector();
    let root = collector.track_named("Pool", "run").unwrap();
    (0..64u64).into_par_iter().for_each(|index| {
        let mut child = root.child_named("Pool", &format!("job_{}", index)).unwrap();
        child.add_metadata("job", &index.to_string());
        std::thread::sleep(Duration::from_micros(rand::random::<u64>() % 500));
        child.close().unwrap();
    });
    let mut root = root;
    root.close().unwrap();
    let batches = reporter.batches();
    assert_eq!(batches.len(), 1);
    let names = child_names(&batches[0][0]);
    assert_eq!(names.len(), 64);
    let distinct: HashSet<&String> = names.iter().collect();
    assert_eq!(distinct.len(), 64);
    for child in &batches[0][0].snapshot().children {
        assert!(child.stopped());
    }
}

#[test]
fn collectors_do_not_share_sessions() {
    let (first_collector, first_reporter) = collector();
    let (second_collector, second_reporter) = collector();
    let mut first = first_collector.track_named("Session", "first").unwrap();
    let mut second = second_collector.track_named("Session", "second").unwrap();
    first.close().unwrap();
    assert_eq!(first_reporter.flush_count(), 1);
    assert_eq!(second_reporter.flush_count(), 0);
    second.close().unwrap();
    assert_eq!(second_reporter.flush_count(), 1);
}
