//! Single-object containers.
//!
//! One allocation holds a [`ContainerHeader`] immediately followed by exactly
//! one object or array. The block lives until its counter returns to tagged
//! zero through [`crate::refcount::release`]; there is no explicit free.
//!
//! The same strategy serves thread-confined ([`ContainerTag::Normal`]),
//! shared ([`ContainerTag::Shared`]) and untracked
//! ([`ContainerTag::NoCount`]) objects. Only the tag differs.

use crate::container::Container;
use crate::error::{Error, Result};
use crate::header::{
    ArrayHeader, ContainerHeader, ContainerKind, ContainerTag, MAX_CONTAINER_SPAN,
    OBJECT_ALIGNMENT, ObjHeader,
};
use crate::stats::COUNTERS;
use crate::tracker;
use crate::types::TypeInfo;
use ferrite_log::trace;
use std::alloc::{self, Layout};
use std::mem::size_of;
use std::ptr::NonNull;

/// Handle to a single-object container.
///
/// The handle is a plain pointer and does not own the block: copying it does
/// not retain, and dropping it does not release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectContainer {
    header: NonNull<ContainerHeader>,
}

impl ObjectContainer {
    /// Allocates a container holding one instance of `type_info`.
    ///
    /// The counter starts at tagged zero and the payload is zeroed, so every
    /// reference field starts null.
    ///
    /// # Errors
    ///
    /// See [`ObjectContainer::with_elements`].
    pub fn new(type_info: &'static TypeInfo, tag: ContainerTag) -> Result<Self> {
        Self::with_elements(type_info, tag, 0)
    }

    /// Allocates a container holding one object of `type_info`; for array
    /// types `count` is the element count and is stored in the array header.
    ///
    /// # Errors
    ///
    /// - [`Error::SizeOverflow`] if the block size does not fit in `usize`
    /// - [`Error::CapacityTooLarge`] if the block exceeds
    ///   [`MAX_CONTAINER_SPAN`]
    /// - [`Error::OutOfMemory`] if the allocator fails
    pub fn with_elements(
        type_info: &'static TypeInfo,
        tag: ContainerTag,
        count: u32,
    ) -> Result<Self> {
        let layout = block_layout(type_info, count)?;

        // SAFETY: the layout has a non-zero size (it includes both headers).
        let block = unsafe { alloc::alloc_zeroed(layout) };
        let block = NonNull::new(block).ok_or(Error::OutOfMemory {
            size: layout.size(),
        })?;
        let header = block.cast::<ContainerHeader>();

        // SAFETY: the block is fresh, aligned and large enough for both
        // headers; the object sits 8 bytes in, well inside the offset width.
        unsafe {
            header.write(ContainerHeader::new(tag, ContainerKind::Object));
            let obj = Self::place_of(header);
            if let Err(err) = ObjHeader::set_meta(obj, header, type_info) {
                alloc::dealloc(block.as_ptr(), layout);
                return Err(err);
            }
            if type_info.is_array() {
                ArrayHeader::set_count(obj.cast(), count);
            }
        }

        COUNTERS.container_created();
        tracker::record(header, ContainerKind::Object, type_info.name, layout.size());
        trace!(
            "created {:?} container {:p} for {} ({} bytes)",
            tag,
            header,
            type_info.name,
            layout.size()
        );

        Ok(ObjectContainer { header })
    }

    /// Wraps an existing header.
    ///
    /// # Safety
    ///
    /// `header` must head a live single-object container.
    #[must_use]
    pub unsafe fn from_header(header: NonNull<ContainerHeader>) -> Self {
        ObjectContainer { header }
    }

    /// The container header.
    #[inline]
    #[must_use]
    pub fn header(&self) -> NonNull<ContainerHeader> {
        self.header
    }

    /// The object stored in this container.
    #[inline]
    #[must_use]
    pub fn place(&self) -> NonNull<ObjHeader> {
        Self::place_of(self.header)
    }

    /// The object stored right after `header`.
    #[inline]
    pub(crate) fn place_of(header: NonNull<ContainerHeader>) -> NonNull<ObjHeader> {
        // SAFETY: a single-object block always extends past its header, so
        // the object address is in bounds and non-null.
        unsafe { header.cast::<u8>().add(size_of::<ContainerHeader>()).cast() }
    }

    /// Layout the block holding `obj` was allocated with.
    ///
    /// # Safety
    ///
    /// `obj` must be the stamped object of a live single-object container.
    pub(crate) unsafe fn layout_of(obj: NonNull<ObjHeader>) -> Layout {
        // SAFETY: caller guarantees `obj` is stamped.
        let type_info = unsafe { obj.as_ref() }.type_info();
        let count = if type_info.is_array() {
            // SAFETY: array types are stamped with an array header.
            unsafe { obj.cast::<ArrayHeader>().as_ref() }.count()
        } else {
            0
        };
        // Creation already validated this exact computation.
        match block_layout(type_info, count) {
            Ok(layout) => layout,
            Err(err) => crate::fatal::fatal_error(format_args!(
                "corrupt object header at {obj:p}: {err}"
            )),
        }
    }
}

fn block_layout(type_info: &TypeInfo, count: u32) -> Result<Layout> {
    let size = type_info
        .storage_size(count)
        .and_then(|size| size.checked_add(size_of::<ContainerHeader>()))
        .ok_or(Error::SizeOverflow)?;
    if size > MAX_CONTAINER_SPAN {
        return Err(Error::CapacityTooLarge {
            size,
            max: MAX_CONTAINER_SPAN,
        });
    }
    Layout::from_size_align(size, OBJECT_ALIGNMENT).map_err(|_| Error::SizeOverflow)
}

impl Container for ObjectContainer {
    fn header(&self) -> NonNull<ContainerHeader> {
        self.header
    }

    fn place(&mut self, _size: usize) -> Option<NonNull<u8>> {
        // The single object was placed at creation.
        None
    }
}
