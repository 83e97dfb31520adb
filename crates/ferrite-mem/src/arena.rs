//! Arena containers.
//!
//! An arena is one fixed-size block, headed by an [`ArenaContainerHeader`],
//! out of which objects are carved by bumping a cursor. Objects placed in an
//! arena are not counted individually: every reference to any of them counts
//! against the arena's single header, and all of them die together when the
//! arena is torn down.
//!
//! # Placement
//!
//! - [`ArenaContainer::place`] is byte-exact: it hands out the cursor and
//!   advances it by exactly `size`.
//! - [`ArenaContainer::place_object`] and [`ArenaContainer::place_array`]
//!   first round the cursor up to [`OBJECT_ALIGNMENT`] and stamp the header.
//!
//! A placement that does not fit returns `None` and leaves the cursor where
//! it was. The arena never grows.
//!
//! # Teardown
//!
//! Dropping an arena whose counter is not at tagged zero aborts the process:
//! something still points into the block, and freeing it would leave that
//! reference dangling. [`ArenaContainer::dispose`] skips the check for
//! callers that know better.
//!
//! # Examples
//!
//! ```
//! use ferrite_mem::arena::ArenaContainer;
//!
//! let mut arena = ArenaContainer::new(64).unwrap();
//! assert!(arena.place(20).is_some());
//! assert!(arena.place(30).is_some());
//! assert!(arena.place(20).is_none());
//! assert_eq!(arena.used(), 50);
//! ```

use crate::container::Container;
use crate::error::{Error, Result};
use crate::header::{
    ArenaContainerHeader, ArrayHeader, ContainerHeader, ContainerKind, ContainerTag,
    MAX_CONTAINER_SPAN, OBJECT_ALIGNMENT, ObjHeader,
};
use crate::reclaim::Reclaimer;
use crate::runtime_assert;
use crate::stats::COUNTERS;
use crate::tracker;
use crate::types::TypeInfo;
use ferrite_log::debug;
use std::alloc::{self, Layout};
use std::mem::{self, ManuallyDrop, size_of};
use std::ptr::NonNull;

/// Owning handle to an arena container.
///
/// Placement takes `&mut self`, so one arena is only ever filled from one
/// place at a time. The handle can move between threads but cannot be
/// shared; wrap it in a `Mutex` to place from several threads.
pub struct ArenaContainer {
    header: NonNull<ArenaContainerHeader>,
    layout: Layout,
    /// Stamped objects, in placement order, walked on teardown.
    ///
    /// This list lives on the heap beside the block, one entry per typed
    /// placement. If it cannot grow, the placement fails like a full arena.
    placed: Vec<NonNull<ObjHeader>>,
}

// SAFETY: the handle exclusively owns its block. The counter is the only
// part reachable from elsewhere, and its discipline is selected by the tag.
unsafe impl Send for ArenaContainer {}

impl ArenaContainer {
    /// Creates a thread-confined arena with `capacity` usable bytes.
    ///
    /// # Errors
    ///
    /// See [`ArenaContainer::with_tag`].
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_tag(capacity, ContainerTag::Normal)
    }

    /// Creates an arena with `capacity` usable bytes and the given tag.
    ///
    /// The region is zeroed, so reference fields of placed objects start
    /// null.
    ///
    /// # Errors
    ///
    /// - [`Error::SizeOverflow`] if header plus capacity overflows
    /// - [`Error::CapacityTooLarge`] if the block would exceed
    ///   [`MAX_CONTAINER_SPAN`]
    /// - [`Error::OutOfMemory`] if the allocator fails
    pub fn with_tag(capacity: usize, tag: ContainerTag) -> Result<Self> {
        let size = size_of::<ArenaContainerHeader>()
            .checked_add(capacity)
            .ok_or(Error::SizeOverflow)?;
        if size > MAX_CONTAINER_SPAN {
            return Err(Error::CapacityTooLarge {
                size,
                max: MAX_CONTAINER_SPAN,
            });
        }
        let layout =
            Layout::from_size_align(size, OBJECT_ALIGNMENT).map_err(|_| Error::SizeOverflow)?;

        // SAFETY: the layout is non-zero sized (it includes the header).
        let block = unsafe { alloc::alloc_zeroed(layout) };
        let block = NonNull::new(block).ok_or(Error::OutOfMemory { size })?;
        let header = block.cast::<ArenaContainerHeader>();

        // SAFETY: `start` and `end` stay within (or one past) the block.
        unsafe {
            let start = block.as_ptr().add(size_of::<ArenaContainerHeader>());
            header.write(ArenaContainerHeader {
                base: ContainerHeader::new(tag, ContainerKind::Arena),
                current: start,
                end: start.add(capacity),
            });
        }

        COUNTERS.arena_created();
        tracker::record(header.cast(), ContainerKind::Arena, "<arena>", size);
        debug!("created {:?} arena {:p} ({} bytes)", tag, header, capacity);

        Ok(ArenaContainer {
            header,
            layout,
            placed: Vec::new(),
        })
    }

    /// The common container header; references into the arena count here.
    #[inline]
    #[must_use]
    pub fn header(&self) -> NonNull<ContainerHeader> {
        self.header.cast()
    }

    fn start_addr(&self) -> usize {
        self.header.addr().get() + size_of::<ArenaContainerHeader>()
    }

    fn current(&self) -> *mut u8 {
        // SAFETY: the header is live for the lifetime of the handle. Only the
        // field is read; no reference to the shared counter is formed.
        unsafe { (*self.header.as_ptr()).current }
    }

    fn end(&self) -> *mut u8 {
        // SAFETY: as in `current`.
        unsafe { (*self.header.as_ptr()).end }
    }

    /// Usable bytes in the region.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.layout.size() - size_of::<ArenaContainerHeader>()
    }

    /// Bytes handed out so far, alignment padding included.
    #[must_use]
    pub fn used(&self) -> usize {
        self.current().addr() - self.start_addr()
    }

    /// Bytes left between the cursor and the end of the region.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.end().addr() - self.current().addr()
    }

    /// Number of stamped objects and arrays placed so far.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.placed.len()
    }

    /// Finds room for `size` bytes aligned to `align` without moving the
    /// cursor. Returns the start and the new cursor address.
    fn reserve(&self, size: usize, align: usize) -> Option<(usize, usize)> {
        let current = self.current().addr();
        let start = current.checked_next_multiple_of(align)?;
        let next = start.checked_add(size)?;
        (next <= self.end().addr()).then_some((start, next))
    }

    fn commit(&mut self, start: usize, next: usize) -> NonNull<u8> {
        let current = self.current();
        COUNTERS.bytes_placed(next - current.addr());
        // SAFETY: `reserve` checked `start <= next <= end`, so both addresses
        // lie inside the block and keep its provenance through `with_addr`.
        unsafe {
            (*self.header.as_ptr()).current = current.with_addr(next);
            NonNull::new_unchecked(current.with_addr(start))
        }
    }

    /// Carves exactly `size` bytes from the cursor.
    ///
    /// Returns `None`, leaving the cursor untouched, if `cursor + size`
    /// would pass the end of the region.
    pub fn place(&mut self, size: usize) -> Option<NonNull<u8>> {
        match self.reserve(size, 1) {
            Some((start, next)) => Some(self.commit(start, next)),
            None => {
                COUNTERS.placement_failed();
                None
            }
        }
    }

    /// Like [`ArenaContainer::place`] but reports why placement failed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ArenaFull`] if the region cannot hold `size` bytes.
    pub fn try_place(&mut self, size: usize) -> Result<NonNull<u8>> {
        let available = self.remaining();
        self.place(size).ok_or(Error::ArenaFull {
            requested: size,
            available,
        })
    }

    /// Places and stamps one instance of `type_info`.
    ///
    /// The storage is 8-byte aligned and zeroed. Returns `None`, leaving the
    /// cursor untouched, if it does not fit or if the arena cannot record the
    /// object for teardown.
    pub fn place_object(&mut self, type_info: &'static TypeInfo) -> Option<NonNull<ObjHeader>> {
        debug_assert!(!type_info.is_array(), "use place_array for {}", type_info.name);
        self.place_typed(type_info, 0)
    }

    /// Places and stamps an array of `count` elements of `type_info`.
    ///
    /// Same failure semantics as [`ArenaContainer::place_object`].
    pub fn place_array(
        &mut self,
        type_info: &'static TypeInfo,
        count: u32,
    ) -> Option<NonNull<ArrayHeader>> {
        debug_assert!(type_info.is_array(), "use place_object for {}", type_info.name);
        self.place_typed(type_info, count).map(NonNull::cast)
    }

    pub(crate) fn place_typed(
        &mut self,
        type_info: &'static TypeInfo,
        count: u32,
    ) -> Option<NonNull<ObjHeader>> {
        let Some((start, next)) = type_info
            .storage_size(count)
            .and_then(|size| self.reserve(size, OBJECT_ALIGNMENT))
            .filter(|_| self.placed.try_reserve(1).is_ok())
        else {
            COUNTERS.placement_failed();
            return None;
        };

        let obj = self.commit(start, next).cast::<ObjHeader>();
        // SAFETY: `obj` is aligned, in bounds and unused. The capacity limit
        // keeps every object within the offset width of the header.
        unsafe {
            if let Err(err) = ObjHeader::set_meta(obj, self.header(), type_info) {
                crate::fatal::fatal_error(format_args!("arena placement: {err}"));
            }
            if type_info.is_array() {
                ArrayHeader::set_count(obj.cast(), count);
            }
        }
        self.placed.push(obj);
        Some(obj)
    }

    /// Frees the arena without checking its counter.
    ///
    /// Every placed object is finalized and the references it holds into
    /// other containers are released; references between objects of this
    /// arena are not counted and are simply dropped with it. Any reference
    /// still pointing into the arena dangles afterwards.
    pub fn dispose(self) {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: the handle is never used again and its Drop does not run.
        unsafe { this.release_storage() };
    }

    /// Frees the arena, aborting the process if it is still referenced.
    ///
    /// Equivalent to dropping the handle.
    pub fn close(self) {
        drop(self);
    }

    /// # Safety
    ///
    /// Must run exactly once, after which the handle is dead.
    unsafe fn release_storage(&mut self) {
        let header = self.header();
        let capacity = self.capacity();
        let mut reclaimer = Reclaimer::new();

        for obj in mem::take(&mut self.placed) {
            // SAFETY: every entry was stamped by `place_typed` and the
            // block is still allocated.
            unsafe { reclaimer.release_refs_of(obj, header) };
        }
        // Containers freed here may still hold references into this arena,
        // so the block has to outlive them.
        // SAFETY: queued containers reached tagged zero in the walk above.
        unsafe { reclaimer.run(None) };

        tracker::forget(header);
        COUNTERS.arena_disposed();
        debug!("disposed arena {:p} ({} bytes)", header, capacity);

        // SAFETY: the block was allocated in `with_tag` with this layout.
        unsafe { alloc::dealloc(self.header.as_ptr().cast(), self.layout) };
    }
}

impl Drop for ArenaContainer {
    fn drop(&mut self) {
        // SAFETY: the header is live until `release_storage` runs below.
        let header = unsafe { self.header().as_ref() };
        runtime_assert!(
            header.is_tagged_zero(),
            "arena {:p} torn down with {} outstanding references",
            self.header,
            header.ref_count()
        );
        // SAFETY: Drop runs once.
        unsafe { self.release_storage() };
    }
}

impl std::fmt::Debug for ArenaContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArenaContainer")
            .field("header", &self.header)
            .field("capacity", &self.capacity())
            .field("used", &self.used())
            .field("objects", &self.placed.len())
            .finish()
    }
}

impl Container for ArenaContainer {
    fn header(&self) -> NonNull<ContainerHeader> {
        ArenaContainer::header(self)
    }

    fn place(&mut self, size: usize) -> Option<NonNull<u8>> {
        ArenaContainer::place(self, size)
    }

    fn dispose(self) {
        ArenaContainer::dispose(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refcount::{add_ref, release};

    static POINT: TypeInfo = TypeInfo::instance("Point", 16, &[]);
    static ODD: TypeInfo = TypeInfo::instance("Odd", 5, &[]);
    static BYTES: TypeInfo = TypeInfo::array("ByteArray", 1, &[]);

    #[test]
    fn test_place_scenario() {
        let mut arena = ArenaContainer::new(64).unwrap();
        let first = arena.place(20).unwrap();
        let second = arena.place(30).unwrap();
        assert_eq!(second.addr().get() - first.addr().get(), 20);
        assert_eq!(arena.used(), 50);

        assert!(arena.place(20).is_none());
        assert_eq!(arena.used(), 50);
        assert_eq!(arena.remaining(), 14);

        // The failed call did not consume the tail.
        assert!(arena.place(14).is_some());
        assert_eq!(arena.remaining(), 0);
        assert!(arena.place(1).is_none());
        assert!(arena.place(0).is_some());
    }

    #[test]
    fn test_running_sum_bound() {
        let sizes = [7usize, 1, 13, 8, 8, 40, 2, 3, 30, 5];
        let capacity = 48;
        let mut arena = ArenaContainer::new(capacity).unwrap();
        let mut sum = 0;
        for size in sizes {
            let placed = arena.place(size);
            if sum + size <= capacity {
                let ptr = placed.unwrap();
                assert_eq!(ptr.addr().get(), arena.start_addr() + sum);
                sum += size;
            } else {
                assert!(placed.is_none());
            }
            assert_eq!(arena.used(), sum);
        }
    }

    #[test]
    fn test_try_place_reports_space() {
        let mut arena = ArenaContainer::new(16).unwrap();
        arena.try_place(10).unwrap();
        assert_eq!(
            arena.try_place(7),
            Err(Error::ArenaFull {
                requested: 7,
                available: 6
            })
        );
    }

    #[test]
    fn test_typed_placement_is_aligned_and_stamped() {
        let mut arena = ArenaContainer::new(256).unwrap();
        arena.place(3).unwrap();

        let point = arena.place_object(&POINT).unwrap();
        assert_eq!(point.addr().get() % OBJECT_ALIGNMENT, 0);
        unsafe {
            assert_eq!(ObjHeader::container(point), arena.header());
            assert_eq!(point.as_ref().type_info().name, "Point");
            assert_eq!(
                point.as_ref().container_offset() as usize,
                point.addr().get() - arena.header().addr().get()
            );
        }

        let odd = arena.place_object(&ODD).unwrap();
        let bytes = arena.place_array(&BYTES, 11).unwrap();
        assert_eq!(odd.addr().get() % OBJECT_ALIGNMENT, 0);
        assert_eq!(bytes.addr().get() % OBJECT_ALIGNMENT, 0);
        unsafe {
            assert_eq!(bytes.as_ref().count(), 11);
            assert_eq!(
                ObjHeader::container(ArrayHeader::as_object(bytes)),
                arena.header()
            );
        }
        assert_eq!(arena.object_count(), 3);
    }

    #[test]
    fn test_typed_placement_failure_keeps_cursor() {
        let mut arena = ArenaContainer::new(40).unwrap();
        arena.place_object(&POINT).unwrap();
        let used = arena.used();
        assert!(arena.place_object(&POINT).is_none());
        assert_eq!(arena.used(), used);
        assert_eq!(arena.object_count(), 1);
    }

    #[test]
    fn test_only_successful_placements_are_recorded() {
        let mut arena = ArenaContainer::new(4 * 32).unwrap();
        for expected in 1..=4 {
            arena.place_object(&POINT).unwrap();
            assert_eq!(arena.object_count(), expected);
        }
        assert!(arena.place_object(&POINT).is_none());
        assert!(arena.place_array(&BYTES, 1).is_none());
        assert_eq!(arena.object_count(), 4);
        assert_eq!(arena.remaining(), 0);

        // Raw placement carves bytes but records nothing.
        let mut raw = ArenaContainer::new(64).unwrap();
        raw.place(32).unwrap();
        assert_eq!(raw.object_count(), 0);
    }

    #[test]
    fn test_referenced_arena_can_be_released_then_dropped() {
        let arena = ArenaContainer::with_tag(32, ContainerTag::Shared).unwrap();
        unsafe {
            add_ref(Some(arena.header()));
            add_ref(Some(arena.header()));
            release(Some(arena.header()));
            release(Some(arena.header()));
        }
        // Tagged zero again: the block is still owned by the handle.
        assert!(unsafe { arena.header().as_ref() }.is_tagged_zero());
        drop(arena);
    }

    #[test]
    fn test_dispose_skips_counter_check() {
        let arena = ArenaContainer::new(32).unwrap();
        unsafe { add_ref(Some(arena.header())) };
        arena.dispose();
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_capacity_limit() {
        assert!(matches!(
            ArenaContainer::new(MAX_CONTAINER_SPAN),
            Err(Error::CapacityTooLarge { .. })
        ));
        assert_eq!(ArenaContainer::new(usize::MAX).unwrap_err(), Error::SizeOverflow);
    }
}
