//! The reference-counting protocol.
//!
//! Emitted code calls [`add_ref`] when it stores a reference and [`release`]
//! when a slot holding one is overwritten or goes out of scope. Both read the
//! container's tag and pick a path:
//!
//! | Tag | `add_ref` | `release` |
//! |-----|-----------|-----------|
//! | [`ContainerTag::NoCount`] | nothing | nothing |
//! | [`ContainerTag::Normal`] | plain load + store | plain load + store, destroy at tagged zero |
//! | [`ContainerTag::Shared`] | `fetch_add` | `fetch_sub`, destroy at tagged zero |
//!
//! Because the tag shares the integer with the count, "reached zero" means
//! the counter equals the tag's own bits, not literal zero.
//!
//! # Thread Safety
//!
//! `Normal` containers must never be touched by two threads; nothing checks
//! this. `Shared` containers may be retained and released from any thread
//! and exactly one `release` observes the transition to tagged zero. The
//! atomics cover the counter only, not the payload.
//!
//! Reference cycles are never collected.

use crate::header::{CONTAINER_TAG_INCREMENT, ContainerHeader, ContainerTag, ObjHeader};
use crate::reclaim;
use std::ptr::NonNull;
use std::sync::atomic::{Ordering, fence};

/// Increments the reference count of `header`. `None` is a no-op.
///
/// # Safety
///
/// `header` must be `None` or point to a live container header. A `Normal`
/// container must only be accessed from the thread that owns it.
#[inline]
pub unsafe fn add_ref(header: Option<NonNull<ContainerHeader>>) {
    let Some(header) = header else {
        return;
    };
    // SAFETY: caller guarantees the header is live.
    let counter = unsafe { header.as_ref() }.counter();
    let raw = counter.load(Ordering::Relaxed);

    match ContainerTag::from_counter(raw) {
        Some(ContainerTag::Normal) => {
            debug_assert!(
                raw <= u32::MAX - CONTAINER_TAG_INCREMENT,
                "reference count overflow"
            );
            counter.store(raw.wrapping_add(CONTAINER_TAG_INCREMENT), Ordering::Relaxed);
        }
        Some(ContainerTag::Shared) => {
            let old = counter.fetch_add(CONTAINER_TAG_INCREMENT, Ordering::Relaxed);
            debug_assert!(
                old <= u32::MAX - CONTAINER_TAG_INCREMENT,
                "reference count overflow"
            );
        }
        Some(ContainerTag::NoCount) | None => {}
    }
}

/// Decrements the reference count of `header`, destroying the container when
/// it reaches tagged zero. `None` is a no-op.
///
/// # Safety
///
/// `header` must be `None` or point to a live container header with at least
/// one outstanding reference (for counted tags). After this call the
/// container may have been freed.
#[inline]
pub unsafe fn release(header: Option<NonNull<ContainerHeader>>) {
    let Some(header) = header else {
        return;
    };
    // SAFETY: forwarded from the caller.
    if unsafe { decrement(header) } {
        // SAFETY: this call observed the transition to tagged zero, so no
        // other reference exists and nobody else will destroy it.
        unsafe { reclaim::destroy(header) };
    }
}

/// Drops one reference and reports whether the counter reached tagged zero.
///
/// Never frees; the caller owns destruction when this returns `true`.
///
/// # Safety
///
/// As for [`release`].
#[inline]
pub(crate) unsafe fn decrement(header: NonNull<ContainerHeader>) -> bool {
    // SAFETY: caller guarantees the header is live.
    let counter = unsafe { header.as_ref() }.counter();
    let raw = counter.load(Ordering::Relaxed);

    match ContainerTag::from_counter(raw) {
        Some(ContainerTag::Normal) => {
            debug_assert!(raw >= CONTAINER_TAG_INCREMENT, "reference count underflow");
            let new = raw.wrapping_sub(CONTAINER_TAG_INCREMENT);
            counter.store(new, Ordering::Relaxed);
            new == ContainerTag::Normal.bits()
        }
        Some(ContainerTag::Shared) => {
            let old = counter.fetch_sub(CONTAINER_TAG_INCREMENT, Ordering::Release);
            debug_assert!(old >= CONTAINER_TAG_INCREMENT, "reference count underflow");
            if old.wrapping_sub(CONTAINER_TAG_INCREMENT) == ContainerTag::Shared.bits() {
                // Pairs with the Release above in every other thread's final
                // decrement, so their writes happen-before destruction.
                fence(Ordering::Acquire);
                true
            } else {
                false
            }
        }
        Some(ContainerTag::NoCount) | None => false,
    }
}

/// Retains the container owning `obj`. `None` is a no-op.
///
/// # Safety
///
/// `obj` must be `None` or a stamped object in a live container.
#[inline]
pub unsafe fn retain_object(obj: Option<NonNull<ObjHeader>>) {
    // SAFETY: forwarded from the caller.
    unsafe { add_ref(obj.map(|obj| ObjHeader::container(obj))) }
}

/// Releases the container owning `obj`. `None` is a no-op.
///
/// # Safety
///
/// As for [`release`], applied to the owning container of `obj`.
#[inline]
pub unsafe fn release_object(obj: Option<NonNull<ObjHeader>>) {
    // SAFETY: forwarded from the caller.
    unsafe { release(obj.map(|obj| ObjHeader::container(obj))) }
}

/// Stores `value` into a reference slot following the store contract:
/// retain the new referent, write, release the previous one.
///
/// Retaining first makes self-assignment safe.
///
/// # Safety
///
/// `slot` must be valid for reads and writes and hold null or a reference
/// this slot owns. `value` must be null or a stamped object in a live
/// container.
#[inline]
pub unsafe fn update_ref(slot: NonNull<*mut ObjHeader>, value: *mut ObjHeader) {
    // SAFETY: forwarded from the caller.
    unsafe {
        retain_object(NonNull::new(value));
        let old = slot.as_ptr().replace(value);
        release_object(NonNull::new(old));
    }
}
