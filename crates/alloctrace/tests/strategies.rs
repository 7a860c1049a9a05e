use std::mem::size_of;
use std::sync::{Mutex, MutexGuard, Once, OnceLock};

use alloctrace::{AllocEvent, Ledger, LoggingAlloc, PathKind, Shared};

static INSTALL: Once = Once::new();

fn test_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

// Tracing is armed per thread and the tests are serialized, so the event
// window each test observes contains only its own allocations.
fn setup() -> MutexGuard<'static, ()> {
    let guard = test_lock().lock().unwrap_or_else(|poison| poison.into_inner());
    INSTALL.call_once(|| {
        let trace = alloctrace::TraceBuilder::new()
            .echo(false)
            .install_with_caller("strategies");
        // Keep the pipeline running for the whole test binary.
        std::mem::forget(trace);
    });
    guard
}

fn traced<R>(f: impl FnOnce() -> R) -> (R, Vec<AllocEvent>) {
    let mark = alloctrace::ledger().expect("trace installed").mark();
    let out = {
        let _scope = alloctrace::scope();
        f()
    };
    let ledger = alloctrace::ledger().expect("trace installed");
    (out, ledger.events_since(mark).to_vec())
}

fn replay(events: &[AllocEvent]) -> Ledger {
    let mut ledger = Ledger::new();
    for &event in events {
        ledger.apply(event);
    }
    ledger
}

#[derive(Debug)]
struct Probe {
    a: i64,
}

#[test]
fn split_strategy_reports_two_heap_pairs() {
    let _guard = setup();

    let (_, events) = traced(|| {
        let probe = Shared::split(Probe { a: 7 });
        assert_eq!(probe.a, 7);
    });

    assert_eq!(events.len(), 4, "events: {events:?}");
    assert!(events.iter().all(|e| e.path() == PathKind::Heap));
    assert_eq!(events.iter().filter(|e| e.is_alloc()).count(), 2);
    assert_eq!(events.iter().filter(|e| e.is_dealloc()).count(), 2);

    // The first allocation is the object itself, sized for one probe.
    assert_eq!(events[0].size(), size_of::<Probe>());

    let ledger = replay(&events);
    assert!(ledger.balanced(), "anomalies: {:?}", ledger.anomalies());
    assert_eq!(ledger.stats(PathKind::Heap).allocs, 2);
    assert_eq!(ledger.stats(PathKind::Heap).deallocs, 2);
}

#[test]
fn combined_strategy_reports_one_heap_pair() {
    let _guard = setup();

    let (_, events) = traced(|| {
        let probe = Shared::new(Probe { a: 8 });
        assert_eq!(probe.a, 8);
    });

    assert_eq!(events.len(), 2, "events: {events:?}");
    let (alloc, dealloc) = (&events[0], &events[1]);
    assert!(alloc.is_alloc() && alloc.path() == PathKind::Heap);
    assert!(dealloc.is_dealloc() && dealloc.path() == PathKind::Heap);
    assert_eq!(alloc.addr(), dealloc.addr());
    assert_eq!(alloc.size(), dealloc.size());
    // Control block and payload travel together.
    assert!(alloc.size() >= size_of::<Probe>());

    assert!(replay(&events).balanced());
}

#[test]
fn allocator_strategy_reports_one_typed_pair_and_no_heap_events() {
    let _guard = setup();

    let (_, events) = traced(|| {
        let probe = Shared::new_in(Probe { a: 9 }, LoggingAlloc::new());
        assert_eq!(probe.a, 9);
    });

    assert_eq!(events.len(), 2, "events: {events:?}");
    assert!(events.iter().all(|e| e.path() == PathKind::Typed));

    match (events[0], events[1]) {
        (
            AllocEvent::TypedAlloc {
                addr: up,
                elem_size: up_size,
                count: 1,
            },
            AllocEvent::TypedDealloc {
                addr: down,
                elem_size: down_size,
                count: 1,
            },
        ) => {
            assert_eq!(up, down);
            assert_eq!(up_size, down_size);
            assert!(up_size >= size_of::<Probe>());
        }
        other => panic!("unexpected event shapes: {other:?}"),
    }

    assert!(replay(&events).balanced());
}

#[test]
fn logging_allocator_reports_element_size_and_count() {
    let _guard = setup();

    // One 64-bit element: elem size 8, count 1, typed path only.
    let (_, events) = traced(|| {
        let alloc = LoggingAlloc::<u64>::new();
        let ptr = alloc.allocate(1);
        unsafe {
            alloc.construct(ptr, 0xfeed);
            alloc.destroy(ptr);
            alloc.deallocate(ptr, 1);
        }
    });

    assert_eq!(events.len(), 2, "events: {events:?}");
    let addr = events[0].addr();
    assert_eq!(
        events[0],
        AllocEvent::TypedAlloc {
            addr,
            elem_size: 8,
            count: 1
        }
    );
    assert_eq!(
        events[1],
        AllocEvent::TypedDealloc {
            addr,
            elem_size: 8,
            count: 1
        }
    );
}

#[test]
fn typed_size_reported_is_elem_size_times_count() {
    let _guard = setup();

    let (_, events) = traced(|| {
        let alloc = LoggingAlloc::<u32>::new();
        let ptr = alloc.allocate(16);
        unsafe { alloc.deallocate(ptr, 16) };
    });

    assert_eq!(events.len(), 2);
    assert_eq!(events[0].size(), 4 * 16);
    assert_eq!(replay(&events).stats(PathKind::Typed).bytes_allocated, 64);
}

#[test]
fn construction_and_destruction_report_nothing() {
    let _guard = setup();

    let alloc = LoggingAlloc::<Probe>::new();
    let ptr = alloc.allocate(1);

    let (_, events) = traced(|| unsafe {
        alloc.construct(ptr, Probe { a: 1 });
        alloc.destroy(ptr);
    });
    assert!(events.is_empty(), "events: {events:?}");

    unsafe { alloc.deallocate(ptr, 1) };
}

#[test]
fn cloned_handle_defers_release_past_first_drop() {
    let _guard = setup();

    let (_, events) = traced(|| {
        let first = Shared::new(Probe { a: 10 });
        let second = first.clone();
        drop(first);
        assert_eq!(Shared::strong_count(&second), 1);
        drop(second);
    });

    // Still exactly one allocation and one matching deallocation: cloning
    // shares the block instead of allocating.
    assert_eq!(events.len(), 2, "events: {events:?}");
    assert!(replay(&events).balanced());
}

#[test]
fn unscoped_allocations_stay_out_of_the_ledger() {
    let _guard = setup();

    let mark = alloctrace::ledger().expect("trace installed").mark();
    {
        // No scope armed: nothing may be recorded.
        let probe = Shared::new(Probe { a: 11 });
        assert_eq!(probe.a, 11);
    }
    let ledger = alloctrace::ledger().expect("trace installed");
    assert_eq!(ledger.events_since(mark), &[]);
}
