//! Heap accounting around failed inserts
//!
//! A failed insert must not leave the compiled entry, the table snapshot, or
//! anything else allocated behind. This test binary installs a counting
//! global allocator and checks the live byte count before and after.
//!
//! Kept to a single test so no other test thread allocates concurrently.

use iptacl::core::lifecycle::{FILTER_TABLE, INPUT_CHAIN};
use iptacl::core::memory::{FailPoint, MemoryBackend};
use iptacl::{ProtocolKind, RuleLifecycleManager, RuleSpec};
use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicIsize, Ordering};

struct Counting;

static LIVE: AtomicIsize = AtomicIsize::new(0);

unsafe impl GlobalAlloc for Counting {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // SAFETY: forwarded unchanged to the system allocator.
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            LIVE.fetch_add(layout.size() as isize, Ordering::SeqCst);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // SAFETY: `ptr` was returned by `alloc` with this layout.
        unsafe { System.dealloc(ptr, layout) };
        LIVE.fetch_sub(layout.size() as isize, Ordering::SeqCst);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        // SAFETY: same contract as `GlobalAlloc::realloc`.
        let new = unsafe { System.realloc(ptr, layout, new_size) };
        if !new.is_null() {
            LIVE.fetch_add(new_size as isize - layout.size() as isize, Ordering::SeqCst);
        }
        new
    }
}

#[global_allocator]
static GLOBAL: Counting = Counting;

fn live() -> isize {
    LIVE.load(Ordering::SeqCst)
}

#[test]
fn test_failed_inserts_release_everything() {
    let backend = MemoryBackend::with_filter_table();
    let manager = RuleLifecycleManager::new(backend.clone());
    let spec = RuleSpec::new("ssh", ProtocolKind::Tcp, "ACCEPT").with_port(22);

    // Warm up lazily initialised state (tracing callsites, hash seeds)
    let handle = manager
        .compile_and_insert_rule(ProtocolKind::Tcp, &spec)
        .unwrap();
    manager.delete_rule(handle).unwrap();

    // Each failure path runs once unmeasured so first-hit callsite
    // registration is not counted.
    let attempt = |label: &str, round: usize| {
        let before = live();
        let result = manager.compile_and_insert_rule(ProtocolKind::Tcp, &spec);
        assert!(result.is_err());
        drop(result);
        if round > 0 {
            assert_eq!(live(), before, "leak after {label}");
        }
    };

    for round in 0..2 {
        for point in [FailPoint::Append, FailPoint::Commit] {
            backend.arm(point);
            attempt(&format!("failure at {point:?}"), round);
            backend.disarm(point);
        }

        backend.remove_chain(FILTER_TABLE, INPUT_CHAIN);
        attempt("missing chain", round);
        backend.add_chain(FILTER_TABLE, INPUT_CHAIN);
    }
}
