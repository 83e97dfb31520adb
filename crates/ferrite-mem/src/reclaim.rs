//! Container destruction.
//!
//! [`destroy`] is the single entry point run when a release drives a counter
//! to tagged zero. For a single-object container it runs the object's
//! finalizer, releases every reference the object holds (as described by its
//! type), and returns the block to the allocator. Containers whose last
//! reference is dropped along the way are queued and handled by the same
//! loop, so long reference chains do not grow the native stack.
//!
//! An arena reaching tagged zero is not freed here: the arena handle owns its
//! block, and tagged zero only means nothing outside holds a reference.

use crate::header::{ContainerHeader, ContainerKind, ObjHeader};
use crate::object::ObjectContainer;
use crate::refcount;
use crate::stats::COUNTERS;
use crate::tracker;
use ferrite_log::trace;
use std::alloc;
use std::ptr::NonNull;

/// Destroys a container whose counter has reached tagged zero.
///
/// # Safety
///
/// `header` must be live, at tagged zero, and not reachable through any
/// counted reference.
pub unsafe fn destroy(header: NonNull<ContainerHeader>) {
    let mut reclaimer = Reclaimer::new();
    // SAFETY: forwarded from the caller.
    unsafe { reclaimer.run(Some(header)) };
}

/// Worklist of containers waiting to be freed.
pub(crate) struct Reclaimer {
    pending: Vec<NonNull<ContainerHeader>>,
}

impl Reclaimer {
    pub(crate) const fn new() -> Self {
        Reclaimer {
            pending: Vec::new(),
        }
    }

    /// Runs `obj`'s finalizer and drops every reference it holds into a
    /// container other than `owner`. Containers that reach tagged zero are
    /// queued for [`Reclaimer::run`].
    ///
    /// # Safety
    ///
    /// `obj` must be a stamped, live object inside `owner`, and its reference
    /// slots must hold null or counted references.
    pub(crate) unsafe fn release_refs_of(
        &mut self,
        obj: NonNull<ObjHeader>,
        owner: NonNull<ContainerHeader>,
    ) {
        // SAFETY: caller guarantees `obj` is stamped and live.
        let type_info = unsafe { obj.as_ref() }.type_info();
        if let Some(finalizer) = type_info.finalizer {
            finalizer(obj);
        }

        let pending = &mut self.pending;
        // SAFETY: caller guarantees storage matches the type.
        unsafe {
            ObjHeader::for_each_ref(obj, |slot| {
                let Some(target) = NonNull::new(slot.as_ptr().read_unaligned()) else {
                    return;
                };
                let child = ObjHeader::container(target);
                // References into the owner die with it.
                if child != owner && refcount::decrement(child) {
                    pending.push(child);
                }
            });
        }
    }

    /// Frees `first` (if any) and everything queued, until the queue drains.
    ///
    /// # Safety
    ///
    /// Every queued header must be at tagged zero and unreachable.
    pub(crate) unsafe fn run(&mut self, first: Option<NonNull<ContainerHeader>>) {
        let mut next = first;
        while let Some(header) = next.take().or_else(|| self.pending.pop()) {
            // SAFETY: queued headers are live until freed below.
            match unsafe { header.as_ref() }.kind() {
                ContainerKind::Object => unsafe { self.free_object_container(header) },
                ContainerKind::Arena => {
                    trace!("arena {:p} reached tagged zero; owner frees it", header);
                }
            }
        }
    }

    unsafe fn free_object_container(&mut self, header: NonNull<ContainerHeader>) {
        let obj = ObjectContainer::place_of(header);
        // SAFETY: the object was stamped when the container was created.
        let (layout, type_name) = unsafe {
            (
                ObjectContainer::layout_of(obj),
                obj.as_ref().type_info().name,
            )
        };

        // SAFETY: the container is at tagged zero and unreachable.
        unsafe { self.release_refs_of(obj, header) };

        trace!(
            "destroying {} container {:p} ({} bytes)",
            type_name,
            header,
            layout.size()
        );
        tracker::forget(header);
        COUNTERS.container_destroyed();

        // SAFETY: the block was allocated by ObjectContainer with this layout.
        unsafe { alloc::dealloc(header.as_ptr().cast(), layout) };
    }
}
