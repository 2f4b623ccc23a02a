//! Concurrency tests for the metrics recorder
//!
//! Many request tasks write outcomes while the supervisor reads snapshots.
//! Every snapshot must satisfy `mock + real == total`, and the window must
//! never hold more than its configured size.

use phaseshift::recorder::MetricsRecorder;
use phaseshift::source::SourceKind;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_counters_stay_consistent_under_concurrent_writes() {
    let recorder = Arc::new(MetricsRecorder::new(500));
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let recorder = Arc::clone(&recorder);
        let done = Arc::clone(&done);
        tokio::spawn(async move {
            let mut observed = 0u64;
            while !done.load(Ordering::SeqCst) {
                let snapshot = recorder.snapshot();
                let c = snapshot.counters;
                assert_eq!(
                    c.mock_requests + c.real_requests,
                    c.total_requests,
                    "snapshot split must add up to total"
                );
                assert!(snapshot.window.len() <= 500);
                observed += 1;
                tokio::task::yield_now().await;
            }
            observed
        })
    };

    let mut writers = Vec::new();
    for task in 0..8u64 {
        let recorder = Arc::clone(&recorder);
        writers.push(tokio::spawn(async move {
            for i in 0..1_000u64 {
                let source = if (task + i) % 3 == 0 {
                    SourceKind::Real
                } else {
                    SourceKind::Mock
                };
                recorder.record((i % 50) as f64, i % 10 != 0, source);
                if i % 100 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        }));
    }

    for writer in writers {
        writer.await.expect("writer task should not panic");
    }
    done.store(true, Ordering::SeqCst);
    let snapshots_read = reader.await.expect("reader task should not panic");
    assert!(snapshots_read > 0);

    let counters = recorder.counters();
    assert_eq!(counters.total_requests, 8_000);
    assert_eq!(counters.errors, 800);
    assert_eq!(
        counters.mock_requests + counters.real_requests,
        counters.total_requests
    );
    assert_eq!(recorder.snapshot().window.len(), 500);
}

#[test]
fn test_window_keeps_most_recent_outcomes() {
    let recorder = MetricsRecorder::new(100);

    // 100 failures followed by 100 successes: only the successes remain
    for _ in 0..100 {
        recorder.record(10.0, false, SourceKind::Real);
    }
    for _ in 0..100 {
        recorder.record(10.0, true, SourceKind::Real);
    }

    let snapshot = recorder.snapshot();
    assert_eq!(snapshot.error_rate(), Some(0.0));
    assert_eq!(snapshot.counters.errors, 100, "cumulative counters keep history");
}

#[test]
fn test_counters_serialize_with_dashboard_field_names() {
    let recorder = MetricsRecorder::new(10);
    recorder.record(5.0, true, SourceKind::Real);
    recorder.record(5.0, true, SourceKind::Mock);

    let json = serde_json::to_value(recorder.counters()).unwrap();
    assert_eq!(json["totalRequests"], 2);
    assert_eq!(json["mockRequests"], 1);
    assert_eq!(json["firebaseRequests"], 1);
}
