use tagheap_tracker::{TrackerError, global, tracked_alloc, tracked_calloc, tracked_free};

// The handle is process-wide, so the whole lifecycle runs in one test.
#[test]
fn global_handle_lifecycle() {
    assert_eq!(tracked_alloc!(8), Err(TrackerError::Uninitialized));
    assert_eq!(global::enable(), Err(TrackerError::Uninitialized));

    global::init(0x0060_0000);
    global::enable().unwrap();
    assert_eq!(global::is_enabled(), Ok(true));

    let a = tracked_alloc!(40).unwrap();
    let z = tracked_calloc!(4, 4).unwrap();
    tracked_free!(z).unwrap();
    assert!(tracked_free!(z).is_err());
    let moved = global::resize(a, 200, tagheap_tracker::call_site!()).unwrap();

    let invalid = global::with_tracker(|t| t.totals().invalid_releases).unwrap();
    assert_eq!(invalid, 1);

    let (heap_logs, tracker_logs) = global::drain_lifecycle_logs().unwrap();
    if global::with_tracker(|t| t.heap().config().lifecycle_log).unwrap() {
        assert!(heap_logs.iter().any(|r| r.event == "alloc"));
        assert!(tracker_logs.iter().any(|r| r.event == "invalid_release"));
    }

    let mut out = Vec::new();
    let summary = global::report_to(&mut out).unwrap().unwrap();
    assert_eq!(summary.unfreed.len(), 1);
    assert_eq!(summary.unfreed[0].addr, moved);
    assert_eq!(summary.leaked_bytes, 200);
    assert_eq!(summary.unfreed[0].function, "global_handle_lifecycle");
    assert_eq!(summary.unfreed[0].file, "tests/global_tracker_test.rs");
    assert!(String::from_utf8(out).unwrap().contains("in function global_handle_lifecycle ("));
    assert_eq!(global::is_enabled(), Ok(false));

    // Nothing stays buffered once the session is reported.
    let buffered = global::with_tracker(|t| {
        t.lifecycle_logs().len() + t.heap().lifecycle_logs().len()
    })
    .unwrap();
    assert_eq!(buffered, 0);

    global::with_tracker(|t| t.heap().verify()).unwrap().unwrap();
}
