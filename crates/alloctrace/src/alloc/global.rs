use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;

use crate::event::AllocEvent;
use crate::state;

thread_local! {
    // 0 = passthrough for this thread; >0 = events are recorded.
    static TRACE_DEPTH: Cell<usize> = const { Cell::new(0) };
}

#[inline]
pub(crate) fn active() -> bool {
    TRACE_DEPTH.try_with(|depth| depth.get() > 0).unwrap_or(false)
}

/// Arms allocation tracing for the current thread until the guard drops.
///
/// Tracing is opt-in per thread so the pipeline's own worker and unrelated
/// runtime threads never show up in the event stream.
pub struct TraceScope {
    _priv: (),
}

/// Arm allocation tracing on the calling thread.
pub fn scope() -> TraceScope {
    let _ = TRACE_DEPTH.try_with(|depth| depth.set(depth.get() + 1));
    TraceScope { _priv: () }
}

impl Drop for TraceScope {
    fn drop(&mut self) {
        let _ = TRACE_DEPTH.try_with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Masks tracing on the current thread, restoring the previous arming depth
/// on drop. Used around work that services the trace itself.
pub(crate) struct Untraced {
    prev: usize,
}

impl Untraced {
    pub(crate) fn new() -> Self {
        let prev = TRACE_DEPTH
            .try_with(|depth| {
                let prev = depth.get();
                depth.set(0);
                prev
            })
            .unwrap_or(0);
        Untraced { prev }
    }
}

impl Drop for Untraced {
    fn drop(&mut self) {
        let prev = self.prev;
        let _ = TRACE_DEPTH.try_with(|depth| depth.set(prev));
    }
}

/// Runs `f` with allocation tracing masked on this thread.
pub fn untraced<R>(f: impl FnOnce() -> R) -> R {
    let _quiet = Untraced::new();
    f()
}

/// Global allocator wrapping [`System`]. Every call made from an armed thread
/// is reported; otherwise it is a pure passthrough.
///
/// The crate installs this as the `#[global_allocator]`, so any binary
/// linking it gets full-process interception once a thread arms tracing.
pub struct TraceSystem;

unsafe impl GlobalAlloc for TraceSystem {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            state::record(AllocEvent::HeapAlloc {
                addr: ptr as usize,
                size: layout.size(),
                zeroed: false,
            });
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc_zeroed(layout) };
        if !ptr.is_null() {
            state::record(AllocEvent::HeapAlloc {
                addr: ptr as usize,
                size: layout.size(),
                zeroed: true,
            });
        }
        ptr
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = unsafe { System.realloc(ptr, layout, new_size) };
        if !new_ptr.is_null() {
            state::record(AllocEvent::HeapRealloc {
                old_addr: ptr as usize,
                new_addr: new_ptr as usize,
                old_size: layout.size(),
                new_size,
            });
        }
        new_ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        state::record(AllocEvent::HeapDealloc {
            addr: ptr as usize,
            size: layout.size(),
        });
        unsafe { System.dealloc(ptr, layout) }
    }
}
