//! whole pipeline runs: tracked sessions landing in JSON array files.
use method_tracer::{traced, AppendWriter, LogFile, SpanCollector};
use serde_json::Value;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

fn fast_writer(directory: &TempDir) -> AppendWriter {
    AppendWriter::new(vec![LogFile::new("calls", directory.path()).unwrap()])
        .with_retry(2, Duration::from_millis(1))
}

fn read_entries(directory: &TempDir) -> Vec<Value> {
    let content = fs::read(directory.path().join("calls.json")).unwrap();
    serde_json::from_slice(&content).unwrap()
}

#[test]
fn sessions_accumulate_in_one_json_array() {
    let directory = TempDir::new().unwrap();
    let collector = SpanCollector::new(fast_writer(&directory));
    for index in 0..3 {
        traced(&collector, "Job", &format!("run_{}", index), |tracker| {
            tracker.add_metadata("index", &index.to_string());
            let mut step = tracker.child_named("Job", "step").unwrap();
            step.close().unwrap();
        })
        .unwrap();
    }
    let entries = read_entries(&directory);
    assert_eq!(entries.len(), 3);
    for (index, entry) in entries.iter().enumerate() {
        assert_eq!(entry["className"], "Job");
        assert_eq!(entry["methodName"], format!("run_{}", index));
        assert_eq!(entry["metadata"]["index"], index.to_string());
        assert_eq!(entry["subMethods"][0]["methodName"], "step");
        assert!(entry["executionTime"].as_f64().unwrap() >= 0.0);
    }
}

#[test]
fn concurrent_reports_to_one_file_never_corrupt_it() {
    let directory = TempDir::new().unwrap();
    std::thread::scope(|scope| {
        for worker in 0..4 {
            let directory = &directory;
            scope.spawn(move || {
                let collector = SpanCollector::new(fast_writer(directory));
                for round in 0..5 {
                    traced(
                        &collector,
                        "Worker",
                        &format!("run_{}_{}", worker, round),
                        |_| {},
                    )
                    .unwrap();
                }
            });
        }
    });
    let entries = read_entries(&directory);
    assert_eq!(entries.len(), 20);
}

#[test]
fn a_fan_out_session_persists_its_whole_tree() {
    let directory = TempDir::new().unwrap();
    let collector = SpanCollector::new(fast_writer(&directory));
    let root = collector.track_named("Fanout", "run").unwrap();
    std::thread::scope(|scope| {
        let root = &root;
        for index in 0..8 {
            scope.spawn(move || {
                let mut child = root
                    .child_named("Fanout", &format!("task_{}", index))
                    .unwrap();
                child.close().unwrap();
            });
        }
    });
    let mut root = root;
    root.close().unwrap();
    let entries = read_entries(&directory);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["subMethods"].as_array().unwrap().len(), 8);
}
