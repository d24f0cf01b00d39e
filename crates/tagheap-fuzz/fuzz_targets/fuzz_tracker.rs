#![no_main]
use libfuzzer_sys::fuzz_target;
use tagheap_core::{HeapAllocator, HeapConfig};
use tagheap_tracker::{CallSite, Tracker, TrackingMode};

const SITE: CallSite<'static> = CallSite::new("fuzz.rs", "fuzz::tracker", 1);

fuzz_target!(|data: &[u8]| {
    let config = HeapConfig::default()
        .with_lifecycle_log(false)
        .with_region_limit(256 * 1024);
    let mut tracker = Tracker::with_mode(
        HeapAllocator::with_config(0x0010_0000, config),
        TrackingMode::On,
    );
    let mut live: Vec<usize> = Vec::new();
    let mut invalid = 0usize;

    for chunk in data.chunks_exact(3) {
        let size = chunk[1] as usize * 4;
        match chunk[0] % 4 {
            0 => {
                if let Ok(addr) = tracker.allocate(size, SITE) {
                    live.push(addr);
                }
            }
            1 if !live.is_empty() => {
                let addr = live.swap_remove(chunk[2] as usize % live.len());
                tracker.release(addr).unwrap();
                // A second release is always caught by the ledger.
                assert!(tracker.release(addr).is_err());
                invalid += 1;
            }
            2 if !live.is_empty() => {
                let idx = chunk[2] as usize % live.len();
                if let Ok(addr) = tracker.resize(live[idx], size, SITE) {
                    live[idx] = addr;
                }
            }
            _ => {}
        }
        tracker.heap().verify().unwrap();
    }

    assert_eq!(tracker.totals().invalid_releases, invalid);
    let summary = tracker.summary();
    let live_bytes: usize = summary
        .unfreed
        .iter()
        .filter(|entry| live.contains(&entry.addr))
        .map(|entry| entry.size)
        .sum();
    assert!(live_bytes <= summary.leaked_bytes);
});
