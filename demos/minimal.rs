use method_tracer::{stats, AppendWriter, LogFile, MemoryReporter, SpanCollector};

fn main() {
    let memory = MemoryReporter::new();
    let collector = SpanCollector::new(memory.clone());

    let mut tracker = collector
        .track_named("Demo", "main")
        .expect("opening the root tracker failed");
    tracker.add_metadata("answer", "42");
    {
        let mut step = tracker
            .child_named("Demo", "step")
            .expect("opening the child tracker failed");
        std::thread::sleep(std::time::Duration::from_millis(200));
        step.close().expect("closing the child tracker failed");
    }
    tracker.close().expect("closing the root tracker failed");

    let batches = memory.batches();
    for line in stats(&batches[0]) {
        println!(
            "{}: {:?} avg ({} calls), total: {:?}",
            line.name, line.average, line.calls, line.total
        );
    }

    // replay the same tree into an append-only file.
    let writer = AppendWriter::new(vec![
        LogFile::new("minimal", "traces").expect("building the log file failed")
    ]);
    let persisted = SpanCollector::new(writer);
    let mut tracker = persisted
        .track_named("Demo", "persisted")
        .expect("opening the persisted tracker failed");
    tracker.close().expect("flushing to traces/minimal.json failed");
}
