#![no_main]
use libfuzzer_sys::fuzz_target;
use tagheap_core::{HeapAllocator, HeapConfig};

// Each 4-byte chunk is one op: [kind, size_lo, size_hi, index].
fuzz_target!(|data: &[u8]| {
    let config = HeapConfig::default()
        .with_lifecycle_log(false)
        .with_region_limit(256 * 1024);
    let mut heap = HeapAllocator::with_config(0x0010_0000, config);
    let mut live: Vec<usize> = Vec::new();
    let mut released: Vec<usize> = Vec::new();

    for chunk in data.chunks_exact(4) {
        let size = u16::from_le_bytes([chunk[1], chunk[2]]) as usize;
        let pick = chunk[3] as usize;

        match chunk[0] % 5 {
            0 => {
                if let Ok(addr) = heap.allocate(size) {
                    live.push(addr);
                }
            }
            1 => {
                if !live.is_empty() {
                    let addr = live.swap_remove(pick % live.len());
                    heap.release(addr).unwrap();
                    released.push(addr);
                }
            }
            2 => {
                if !live.is_empty() {
                    let idx = pick % live.len();
                    let old = live[idx];
                    if let Ok(addr) = heap.resize(old, size) {
                        if addr != old {
                            released.push(old);
                        }
                        live[idx] = addr;
                    }
                }
            }
            3 => {
                if let Ok(addr) = heap.zero_allocate(size % 64, pick) {
                    assert!(heap.payload(addr).unwrap().iter().all(|&b| b == 0));
                    live.push(addr);
                }
            }
            _ => {
                // Anything that is not a live payload is rejected without
                // touching the heap: null, past the end, or an address that
                // was released before (possibly merged away since).
                let addr = match pick % 3 {
                    0 => 0,
                    1 if !released.is_empty() => released[size % released.len()],
                    _ => heap.region_end() + 4 + size,
                };
                if !live.contains(&addr) {
                    let before = heap.stats();
                    assert!(heap.release(addr).is_err());
                    assert_eq!(heap.stats(), before);
                }
            }
        }
        heap.verify().unwrap();
    }

    for addr in live {
        heap.release(addr).unwrap();
    }
    heap.verify().unwrap();
    assert_eq!(heap.stats().allocated_blocks, 0);
});
