use std::collections::HashMap;

use hdrhistogram::Histogram;

use crate::event::{AllocEvent, PathKind};

/// A block that has been allocated and not yet released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveBlock {
    pub size: usize,
    pub path: PathKind,
}

/// A pairing violation between an allocation and its deallocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    /// Dealloc with no live alloc at that address.
    UnknownDealloc { addr: usize, path: PathKind },
    /// Alloc and dealloc disagree on the block size.
    SizeMismatch {
        addr: usize,
        expected: usize,
        got: usize,
    },
    /// Block released through a different path than the one that supplied it.
    PathMismatch {
        addr: usize,
        allocated: PathKind,
        freed: PathKind,
    },
}

/// Counters and a size distribution for one trace path.
#[derive(Clone)]
pub struct PathStats {
    pub allocs: u64,
    pub deallocs: u64,
    pub bytes_allocated: u64,
    pub bytes_freed: u64,
    size_hist: Histogram<u64>,
}

impl PathStats {
    const LOW_BYTES: u64 = 1;
    const HIGH_BYTES: u64 = 1_000_000_000; // 1GB
    const SIGFIGS: u8 = 3;

    fn new() -> Self {
        let size_hist =
            Histogram::<u64>::new_with_bounds(Self::LOW_BYTES, Self::HIGH_BYTES, Self::SIGFIGS)
                .expect("hdrhistogram init");
        Self {
            allocs: 0,
            deallocs: 0,
            bytes_allocated: 0,
            bytes_freed: 0,
            size_hist,
        }
    }

    fn record_alloc(&mut self, size: usize) {
        self.allocs += 1;
        self.bytes_allocated += size as u64;
        // Clamped into the histogram's bounds, so record cannot fail.
        let clamped = (size as u64).clamp(Self::LOW_BYTES, Self::HIGH_BYTES);
        let _ = self.size_hist.record(clamped);
    }

    fn record_dealloc(&mut self, size: usize) {
        self.deallocs += 1;
        self.bytes_freed += size as u64;
    }

    pub fn size_percentile(&self, p: f64) -> u64 {
        if self.allocs == 0 {
            return 0;
        }
        let p = p.clamp(0.0, 100.0);
        self.size_hist.value_at_percentile(p)
    }

    pub fn max_size(&self) -> u64 {
        if self.allocs == 0 {
            return 0;
        }
        self.size_hist.max()
    }
}

impl Default for PathStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Folds the event stream into per-path stats, a live-block map, and the
/// pairing anomalies the stream revealed.
///
/// The worker maintains the process-wide ledger; a fresh one can also replay
/// a slice of events to check an isolated window.
#[derive(Clone, Default)]
pub struct Ledger {
    events: Vec<AllocEvent>,
    live: HashMap<usize, LiveBlock>,
    heap: PathStats,
    typed: PathStats,
    anomalies: Vec<Anomaly>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: AllocEvent) {
        self.events.push(event);
        match event {
            AllocEvent::HeapAlloc { addr, size, .. } => self.on_alloc(PathKind::Heap, addr, size),
            AllocEvent::HeapRealloc {
                old_addr,
                new_addr,
                old_size,
                new_size,
            } => {
                self.on_dealloc(PathKind::Heap, old_addr, old_size);
                self.on_alloc(PathKind::Heap, new_addr, new_size);
            }
            AllocEvent::HeapDealloc { addr, size } => self.on_dealloc(PathKind::Heap, addr, size),
            AllocEvent::TypedAlloc {
                addr,
                elem_size,
                count,
            } => self.on_alloc(PathKind::Typed, addr, elem_size * count),
            AllocEvent::TypedDealloc {
                addr,
                elem_size,
                count,
            } => self.on_dealloc(PathKind::Typed, addr, elem_size * count),
        }
    }

    fn on_alloc(&mut self, path: PathKind, addr: usize, size: usize) {
        self.stats_mut(path).record_alloc(size);
        self.live.insert(addr, LiveBlock { size, path });
    }

    fn on_dealloc(&mut self, path: PathKind, addr: usize, size: usize) {
        match self.live.remove(&addr) {
            None => self.anomalies.push(Anomaly::UnknownDealloc { addr, path }),
            Some(block) => {
                if block.path != path {
                    self.anomalies.push(Anomaly::PathMismatch {
                        addr,
                        allocated: block.path,
                        freed: path,
                    });
                } else if block.size != size {
                    self.anomalies.push(Anomaly::SizeMismatch {
                        addr,
                        expected: block.size,
                        got: size,
                    });
                }
                self.stats_mut(path).record_dealloc(block.size);
            }
        }
    }

    fn stats_mut(&mut self, path: PathKind) -> &mut PathStats {
        match path {
            PathKind::Heap => &mut self.heap,
            PathKind::Typed => &mut self.typed,
        }
    }

    pub fn stats(&self, path: PathKind) -> &PathStats {
        match path {
            PathKind::Heap => &self.heap,
            PathKind::Typed => &self.typed,
        }
    }

    pub fn events(&self) -> &[AllocEvent] {
        &self.events
    }

    /// Position marker for a later [`events_since`](Ledger::events_since).
    pub fn mark(&self) -> usize {
        self.events.len()
    }

    pub fn events_since(&self, mark: usize) -> &[AllocEvent] {
        &self.events[mark.min(self.events.len())..]
    }

    pub fn anomalies(&self) -> &[Anomaly] {
        &self.anomalies
    }

    /// Blocks allocated but not yet released, sorted by address.
    pub fn leaked(&self) -> Vec<(usize, LiveBlock)> {
        let mut blocks: Vec<_> = self.live.iter().map(|(&addr, &block)| (addr, block)).collect();
        blocks.sort_by_key(|&(addr, _)| addr);
        blocks
    }

    pub fn live_blocks(&self, path: PathKind) -> usize {
        self.live.values().filter(|block| block.path == path).count()
    }

    /// True when every allocation has been matched by exactly one consistent
    /// deallocation and nothing is still live.
    pub fn balanced(&self) -> bool {
        self.live.is_empty() && self.anomalies.is_empty()
    }
}
