use serde::Serialize;
use std::fmt;

/// Which interception layer reported an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PathKind {
    /// The process-wide override wrapping the system allocator.
    Heap,
    /// An explicit [`LoggingAlloc`](crate::LoggingAlloc) call.
    Typed,
}

impl PathKind {
    pub fn label(self) -> &'static str {
        match self {
            PathKind::Heap => "heap",
            PathKind::Typed => "typed",
        }
    }
}

impl fmt::Display for PathKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One allocation or deallocation occurrence.
///
/// Events are `Copy` so sending one through the trace channel never touches
/// the heap; the channel buffer is preallocated at init.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum AllocEvent {
    HeapAlloc {
        addr: usize,
        size: usize,
        zeroed: bool,
    },
    HeapRealloc {
        old_addr: usize,
        new_addr: usize,
        old_size: usize,
        new_size: usize,
    },
    HeapDealloc {
        addr: usize,
        size: usize,
    },
    TypedAlloc {
        addr: usize,
        elem_size: usize,
        count: usize,
    },
    TypedDealloc {
        addr: usize,
        elem_size: usize,
        count: usize,
    },
}

impl AllocEvent {
    pub fn path(&self) -> PathKind {
        match self {
            AllocEvent::HeapAlloc { .. }
            | AllocEvent::HeapRealloc { .. }
            | AllocEvent::HeapDealloc { .. } => PathKind::Heap,
            AllocEvent::TypedAlloc { .. } | AllocEvent::TypedDealloc { .. } => PathKind::Typed,
        }
    }

    /// Bytes requested by an allocation, or released by a deallocation.
    /// For a realloc this is the new size.
    pub fn size(&self) -> usize {
        match *self {
            AllocEvent::HeapAlloc { size, .. } => size,
            AllocEvent::HeapRealloc { new_size, .. } => new_size,
            AllocEvent::HeapDealloc { size, .. } => size,
            AllocEvent::TypedAlloc {
                elem_size, count, ..
            } => elem_size * count,
            AllocEvent::TypedDealloc {
                elem_size, count, ..
            } => elem_size * count,
        }
    }

    pub fn addr(&self) -> usize {
        match *self {
            AllocEvent::HeapAlloc { addr, .. } => addr,
            AllocEvent::HeapRealloc { new_addr, .. } => new_addr,
            AllocEvent::HeapDealloc { addr, .. } => addr,
            AllocEvent::TypedAlloc { addr, .. } => addr,
            AllocEvent::TypedDealloc { addr, .. } => addr,
        }
    }

    pub fn is_alloc(&self) -> bool {
        matches!(
            self,
            AllocEvent::HeapAlloc { .. }
                | AllocEvent::HeapRealloc { .. }
                | AllocEvent::TypedAlloc { .. }
        )
    }

    pub fn is_dealloc(&self) -> bool {
        matches!(
            self,
            AllocEvent::HeapRealloc { .. }
                | AllocEvent::HeapDealloc { .. }
                | AllocEvent::TypedDealloc { .. }
        )
    }
}

impl fmt::Display for AllocEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            AllocEvent::HeapAlloc { addr, size, zeroed } => {
                let tag = if zeroed { "alloc0 " } else { "alloc  " };
                write!(f, "heap  {tag} {addr:#x} {size} B")
            }
            AllocEvent::HeapRealloc {
                old_addr,
                new_addr,
                old_size,
                new_size,
            } => {
                write!(
                    f,
                    "heap  realloc {old_addr:#x} -> {new_addr:#x} {old_size} B -> {new_size} B"
                )
            }
            AllocEvent::HeapDealloc { addr, size } => {
                write!(f, "heap  dealloc {addr:#x} {size} B")
            }
            AllocEvent::TypedAlloc {
                addr,
                elem_size,
                count,
            } => {
                write!(f, "typed alloc   {addr:#x} {elem_size} B x {count}")
            }
            AllocEvent::TypedDealloc {
                addr,
                elem_size,
                count,
            } => {
                write!(f, "typed dealloc {addr:#x} {elem_size} B x {count}")
            }
        }
    }
}
