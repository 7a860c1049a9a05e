use std::alloc::Layout;
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::ptr::{self, NonNull};

use crate::alloc::typed::{HeapStore, LoggingAlloc, RawStore};

/// Shared-ownership bookkeeping: the strong count plus the release routine
/// that tears the value down and returns its storage.
struct Control {
    strong: Cell<usize>,
    release: unsafe fn(NonNull<Control>),
}

// Strategy 1: the control record points at a separately allocated payload.
#[repr(C)]
struct SplitBlock<T> {
    ctrl: Control,
    payload: NonNull<T>,
}

// Strategies 2 and 3: control block and payload in one allocation.
#[repr(C)]
struct InlineBlock<T> {
    ctrl: Control,
    value: ManuallyDrop<T>,
}

/// Single-threaded reference-counted handle.
///
/// Each constructor exercises a different allocation shape; the value itself
/// moves through allocate, construct, destroy, deallocate exactly once, with
/// destruction and release triggered when the last handle drops.
pub struct Shared<T> {
    ctrl: NonNull<Control>,
    value: NonNull<T>,
    _marker: PhantomData<T>,
}

impl<T> Shared<T> {
    /// Raw-allocate-then-wrap: payload storage comes straight from the heap
    /// and the control record is a second, separate heap allocation. Two
    /// heap events up, two down.
    pub fn split(value: T) -> Self {
        let payload = HeapStore.allocate(Layout::new::<T>()).cast::<T>();
        unsafe { ptr::write(payload.as_ptr(), value) };

        let block = Box::new(SplitBlock {
            ctrl: Control {
                strong: Cell::new(1),
                release: release_split::<T>,
            },
            payload,
        });
        let block = NonNull::from(Box::leak(block));

        Shared {
            ctrl: block.cast(),
            value: payload,
            _marker: PhantomData,
        }
    }

    /// Combined allocation: control block and payload together in a single
    /// heap allocation. One heap event each way, whatever the payload size.
    pub fn new(value: T) -> Self {
        let block = Box::new(InlineBlock {
            ctrl: Control {
                strong: Cell::new(1),
                release: release_inline::<T>,
            },
            value: ManuallyDrop::new(value),
        });
        let block = NonNull::from(Box::leak(block));

        Shared {
            ctrl: block.cast(),
            value: inline_value_ptr(block),
            _marker: PhantomData,
        }
    }

    /// Combined allocation drawn from the supplied typed allocator, rebound
    /// internally to the block type. The one allocation is reported on the
    /// typed path only; the global override never sees it.
    pub fn new_in(value: T, alloc: LoggingAlloc<T>) -> Self {
        let alloc = alloc.rebind::<InlineBlock<T>>();
        let block = alloc.allocate(1);
        unsafe {
            alloc.construct(
                block,
                InlineBlock {
                    ctrl: Control {
                        strong: Cell::new(1),
                        release: release_inline_in::<T>,
                    },
                    value: ManuallyDrop::new(value),
                },
            );
        }

        Shared {
            ctrl: block.cast(),
            value: inline_value_ptr(block),
            _marker: PhantomData,
        }
    }

    pub fn strong_count(this: &Self) -> usize {
        unsafe { this.ctrl.as_ref() }.strong.get()
    }
}

fn inline_value_ptr<T>(block: NonNull<InlineBlock<T>>) -> NonNull<T> {
    // ManuallyDrop<T> is repr(transparent) over T.
    unsafe { NonNull::new_unchecked(ptr::addr_of_mut!((*block.as_ptr()).value).cast::<T>()) }
}

unsafe fn release_split<T>(ctrl: NonNull<Control>) {
    let block = ctrl.cast::<SplitBlock<T>>();
    let payload = unsafe { block.as_ref().payload };
    unsafe {
        ptr::drop_in_place(payload.as_ptr());
        HeapStore.deallocate(payload.cast(), Layout::new::<T>());
        drop(Box::from_raw(block.as_ptr()));
    }
}

unsafe fn release_inline<T>(ctrl: NonNull<Control>) {
    let block = ctrl.cast::<InlineBlock<T>>();
    unsafe {
        ManuallyDrop::drop(&mut (*block.as_ptr()).value);
        drop(Box::from_raw(block.as_ptr()));
    }
}

unsafe fn release_inline_in<T>(ctrl: NonNull<Control>) {
    let block = ctrl.cast::<InlineBlock<T>>();
    let alloc = LoggingAlloc::<InlineBlock<T>>::new();
    unsafe {
        ManuallyDrop::drop(&mut (*block.as_ptr()).value);
        alloc.deallocate(block, 1);
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        let ctrl = unsafe { self.ctrl.as_ref() };
        ctrl.strong.set(ctrl.strong.get() + 1);
        Shared {
            ctrl: self.ctrl,
            value: self.value,
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let ctrl = unsafe { self.ctrl.as_ref() };
        let strong = ctrl.strong.get() - 1;
        ctrl.strong.set(strong);
        if strong == 0 {
            let release = ctrl.release;
            unsafe { release(self.ctrl) };
        }
    }
}

impl<T> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.value.as_ref() }
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
