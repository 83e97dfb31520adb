//! The capability shared by every container strategy.
//!
//! The runtime has exactly two strategies, [`ObjectContainer`] and
//! [`ArenaContainer`]. Code that only needs to place storage or move a
//! container's counter can be written once against [`Container`].
//!
//! [`ObjectContainer`]: crate::object::ObjectContainer
//! [`ArenaContainer`]: crate::arena::ArenaContainer

use crate::header::{ContainerHeader, ContainerTag};
use crate::refcount;
use std::ptr::NonNull;

/// A storage block that starts with a [`ContainerHeader`].
pub trait Container {
    /// The header at the start of the block.
    fn header(&self) -> NonNull<ContainerHeader>;

    /// Carves `size` bytes out of the container.
    ///
    /// Returns `None` when the container cannot hold another `size` bytes.
    /// Single-object containers are filled at creation and always return
    /// `None`.
    fn place(&mut self, size: usize) -> Option<NonNull<u8>>;

    /// Releases the container's storage if the strategy allows it.
    ///
    /// Single-object containers are freed only by their last release, so
    /// the default does nothing.
    fn dispose(self)
    where
        Self: Sized,
    {
    }

    /// The container's tag.
    fn tag(&self) -> ContainerTag {
        // SAFETY: a live handle always points at an initialized header.
        unsafe { self.header().as_ref() }.tag()
    }

    /// Logical number of outstanding references.
    fn ref_count(&self) -> u32 {
        // SAFETY: as above.
        unsafe { self.header().as_ref() }.ref_count()
    }

    /// Adds one reference.
    ///
    /// # Safety
    ///
    /// See [`refcount::add_ref`].
    unsafe fn retain(&self) {
        // SAFETY: forwarded from the caller.
        unsafe { refcount::add_ref(Some(self.header())) }
    }

    /// Drops one reference. A single-object container may be freed by this
    /// call; an arena never is.
    ///
    /// # Safety
    ///
    /// See [`refcount::release`]. The handle must not be used afterwards if
    /// this could have been the last reference to a single-object container.
    unsafe fn release(&self) {
        // SAFETY: forwarded from the caller.
        unsafe { refcount::release(Some(self.header())) }
    }
}
