//! Process-wide allocation counters.
//!
//! Counters are relaxed atomics bumped on the allocation paths. They are
//! diagnostics only; nothing in the memory core reads them back to make a
//! decision.

use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) static COUNTERS: Counters = Counters::new();

pub(crate) struct Counters {
    containers_created: AtomicUsize,
    containers_destroyed: AtomicUsize,
    arenas_created: AtomicUsize,
    arenas_disposed: AtomicUsize,
    arena_bytes_placed: AtomicUsize,
    placement_failures: AtomicUsize,
    arena_fallbacks: AtomicUsize,
}

impl Counters {
    const fn new() -> Self {
        Counters {
            containers_created: AtomicUsize::new(0),
            containers_destroyed: AtomicUsize::new(0),
            arenas_created: AtomicUsize::new(0),
            arenas_disposed: AtomicUsize::new(0),
            arena_bytes_placed: AtomicUsize::new(0),
            placement_failures: AtomicUsize::new(0),
            arena_fallbacks: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub(crate) fn container_created(&self) {
        self.containers_created.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn container_destroyed(&self) {
        self.containers_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn arena_created(&self) {
        self.arenas_created.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn arena_disposed(&self) {
        self.arenas_disposed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn bytes_placed(&self, size: usize) {
        self.arena_bytes_placed.fetch_add(size, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn placement_failed(&self) {
        self.placement_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn arena_fallback(&self) {
        self.arena_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> MemoryStats {
        MemoryStats {
            containers_created: self.containers_created.load(Ordering::Relaxed),
            containers_destroyed: self.containers_destroyed.load(Ordering::Relaxed),
            arenas_created: self.arenas_created.load(Ordering::Relaxed),
            arenas_disposed: self.arenas_disposed.load(Ordering::Relaxed),
            arena_bytes_placed: self.arena_bytes_placed.load(Ordering::Relaxed),
            placement_failures: self.placement_failures.load(Ordering::Relaxed),
            arena_fallbacks: self.arena_fallbacks.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the allocation counters.
///
/// Counters are read one by one, so a snapshot taken while other threads
/// allocate is not a consistent cut.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Single-object containers allocated.
    pub containers_created: usize,
    /// Single-object containers freed by reclamation.
    pub containers_destroyed: usize,
    /// Arena containers allocated.
    pub arenas_created: usize,
    /// Arena containers freed.
    pub arenas_disposed: usize,
    /// Bytes handed out by arena placement, alignment padding included.
    pub arena_bytes_placed: usize,
    /// Arena placements that failed for lack of space.
    pub placement_failures: usize,
    /// Arena-hinted allocations served by a single-object container instead.
    pub arena_fallbacks: usize,
}

impl MemoryStats {
    /// Single-object containers not yet freed.
    #[must_use]
    pub fn live_containers(&self) -> usize {
        self.containers_created
            .saturating_sub(self.containers_destroyed)
    }

    /// Arenas not yet freed.
    #[must_use]
    pub fn live_arenas(&self) -> usize {
        self.arenas_created.saturating_sub(self.arenas_disposed)
    }
}

/// Returns the current allocation counters.
#[must_use]
pub fn stats() -> MemoryStats {
    COUNTERS.snapshot()
}
