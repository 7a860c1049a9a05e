use std::alloc::{handle_alloc_error, Layout};
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ptr::{self, NonNull};

use crate::alloc::global::untraced;
use crate::event::AllocEvent;
use crate::state;

/// Storage capability: a source that can hand out and take back raw blocks.
///
/// Construction strategies take their storage source through this trait
/// instead of reaching for the heap directly.
pub trait RawStore {
    /// Returns uninitialized storage for `layout`. Must not return null;
    /// exhaustion is fatal via [`handle_alloc_error`].
    fn allocate(&self, layout: Layout) -> NonNull<u8>;

    /// # Safety
    /// `ptr` must come from `allocate` on an interchangeable store with the
    /// same `layout`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// Passthrough to the process heap. Its traffic is reported by the global
/// override, not the typed path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStore;

impl RawStore for HeapStore {
    fn allocate(&self, layout: Layout) -> NonNull<u8> {
        if layout.size() == 0 {
            return NonNull::dangling();
        }
        let ptr = unsafe { std::alloc::alloc(layout) };
        match NonNull::new(ptr) {
            Some(ptr) => ptr,
            None => handle_alloc_error(layout),
        }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) }
    }
}

/// Stateless typed allocator that reports every allocate/deallocate call on
/// the typed trace path and delegates storage to the process heap.
///
/// Any two instances are interchangeable, whatever their element types;
/// [`rebind`](LoggingAlloc::rebind) converts between element types. For a
/// zero-sized element the storage operations are inert and only the
/// type-conversion machinery remains useful.
pub struct LoggingAlloc<T> {
    _marker: PhantomData<T>,
}

impl<T> LoggingAlloc<T> {
    pub const fn new() -> Self {
        LoggingAlloc {
            _marker: PhantomData,
        }
    }

    /// Converts this allocator into one for another element type.
    pub fn rebind<U>(&self) -> LoggingAlloc<U> {
        LoggingAlloc::new()
    }

    fn array_layout(count: usize) -> Layout {
        // Overflowing the address-space size type is a caller bug, checked
        // against max_size().
        Layout::array::<T>(count).expect("allocation size overflows usize")
    }

    /// Requests storage for `count` contiguous elements. Reports one typed
    /// alloc event; the heap delegation runs masked so the global override
    /// does not report it again. Exhaustion is fatal via
    /// [`handle_alloc_error`]. Zero-sized requests return a dangling pointer
    /// and report nothing.
    pub fn allocate(&self, count: usize) -> NonNull<T> {
        let layout = Self::array_layout(count);
        if layout.size() == 0 {
            return NonNull::dangling();
        }
        let ptr = untraced(|| unsafe { std::alloc::alloc(layout) });
        let ptr = match NonNull::new(ptr) {
            Some(ptr) => ptr,
            None => handle_alloc_error(layout),
        };
        state::record(AllocEvent::TypedAlloc {
            addr: ptr.as_ptr() as usize,
            elem_size: mem::size_of::<T>(),
            count,
        });
        ptr.cast()
    }

    /// Same as [`allocate`](LoggingAlloc::allocate); the placement hint is
    /// accepted for interface compatibility and ignored.
    pub fn allocate_hint(&self, count: usize, _hint: Option<NonNull<T>>) -> NonNull<T> {
        self.allocate(count)
    }

    /// Reports one typed dealloc event and releases the storage.
    ///
    /// # Safety
    /// `ptr` must come from `allocate(count)` on an interchangeable instance
    /// and must not be used afterwards.
    pub unsafe fn deallocate(&self, ptr: NonNull<T>, count: usize) {
        let layout = Self::array_layout(count);
        if layout.size() == 0 {
            return;
        }
        state::record(AllocEvent::TypedDealloc {
            addr: ptr.as_ptr() as usize,
            elem_size: mem::size_of::<T>(),
            count,
        });
        untraced(|| unsafe { std::alloc::dealloc(ptr.as_ptr().cast(), layout) });
    }

    /// Writes `value` into uninitialized storage. Construction is separate
    /// from allocation and reports nothing.
    ///
    /// # Safety
    /// `ptr` must point to uninitialized storage valid for a `T`.
    pub unsafe fn construct(&self, ptr: NonNull<T>, value: T) {
        unsafe { ptr::write(ptr.as_ptr(), value) }
    }

    /// Drops the value in place without releasing its storage. Reports
    /// nothing.
    ///
    /// # Safety
    /// `ptr` must point to a live `T` that is not dropped again.
    pub unsafe fn destroy(&self, ptr: NonNull<T>) {
        unsafe { ptr::drop_in_place(ptr.as_ptr()) }
    }

    pub fn address(&self, value: &T) -> *const T {
        value as *const T
    }

    pub fn address_mut(&self, value: &mut T) -> *mut T {
        value as *mut T
    }

    /// Largest count whose byte size does not overflow `usize`.
    pub fn max_size(&self) -> usize {
        match mem::size_of::<T>() {
            0 => usize::MAX,
            size => usize::MAX / size,
        }
    }
}

impl<T> Clone for LoggingAlloc<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for LoggingAlloc<T> {}

impl<T> Default for LoggingAlloc<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for LoggingAlloc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LoggingAlloc<{}>", std::any::type_name::<T>())
    }
}

// Always equal, across element types.
impl<T, U> PartialEq<LoggingAlloc<U>> for LoggingAlloc<T> {
    fn eq(&self, _other: &LoggingAlloc<U>) -> bool {
        true
    }
}

impl<T> Eq for LoggingAlloc<T> {}
