//! C ABI entry points for emitted code.
//!
//! Generated code links against these symbols instead of the Rust API. Null
//! pointers are accepted wherever the protocol treats null as "no object".
//! Allocation entry points return null on failure after logging the error;
//! they never unwind across the boundary.

use crate::config::MemoryConfig;
use crate::error::Error;
use crate::header::{ArrayHeader, ContainerHeader, ObjHeader};
use crate::memory::{self, PlacementHint};
use crate::refcount;
use crate::types::TypeInfo;
use ferrite_log::error;
use std::ptr::{self, NonNull};

/// Initializes the process-wide facade from the environment.
///
/// Returns `true` once the facade is usable, including when it was already
/// initialized; `false` if the configuration is invalid.
#[unsafe(no_mangle)]
pub extern "C" fn ferrite_init_memory() -> bool {
    match MemoryConfig::from_env().and_then(memory::init_memory) {
        Ok(_) | Err(Error::AlreadyInitialized) => true,
        Err(err) => {
            error!("ferrite_init_memory: {}", err);
            false
        }
    }
}

/// Adds one reference to `container`. Null is a no-op.
///
/// # Safety
///
/// See [`refcount::add_ref`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ferrite_add_ref(container: *mut ContainerHeader) {
    // SAFETY: forwarded from the caller.
    unsafe { refcount::add_ref(NonNull::new(container)) }
}

/// Drops one reference to `container`, destroying it at tagged zero. Null is
/// a no-op.
///
/// # Safety
///
/// See [`refcount::release`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ferrite_release(container: *mut ContainerHeader) {
    // SAFETY: forwarded from the caller.
    unsafe { refcount::release(NonNull::new(container)) }
}

/// Stores `value` into `slot`, retaining the new referent and releasing the
/// old one.
///
/// # Safety
///
/// See [`refcount::update_ref`]. `slot` must not be null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ferrite_update_ref(slot: *mut *mut ObjHeader, value: *mut ObjHeader) {
    let Some(slot) = NonNull::new(slot) else {
        error!("ferrite_update_ref: null slot");
        return;
    };
    // SAFETY: forwarded from the caller.
    unsafe { refcount::update_ref(slot, value) }
}

/// Allocates one instance through the process-wide facade.
///
/// `hint` is a [`PlacementHint`] discriminant. Returns null on failure.
///
/// # Safety
///
/// `type_info` must be null or point to a `TypeInfo` that lives for the rest
/// of the process.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ferrite_alloc_instance(
    type_info: *const TypeInfo,
    hint: u32,
) -> *mut ObjHeader {
    // SAFETY: forwarded from the caller.
    let Some((type_info, hint)) = (unsafe { decode("ferrite_alloc_instance", type_info, hint) })
    else {
        return ptr::null_mut();
    };
    match memory::alloc_instance(type_info, hint) {
        Ok(obj) => obj.as_ptr(),
        Err(err) => {
            error!("ferrite_alloc_instance({}): {}", type_info.name, err);
            ptr::null_mut()
        }
    }
}

/// Allocates an array of `count` elements through the process-wide facade.
///
/// Returns null on failure.
///
/// # Safety
///
/// As for [`ferrite_alloc_instance`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ferrite_alloc_array_instance(
    type_info: *const TypeInfo,
    hint: u32,
    count: u32,
) -> *mut ArrayHeader {
    // SAFETY: forwarded from the caller.
    let Some((type_info, hint)) =
        (unsafe { decode("ferrite_alloc_array_instance", type_info, hint) })
    else {
        return ptr::null_mut();
    };
    match memory::alloc_array_instance(type_info, hint, count) {
        Ok(array) => array.as_ptr(),
        Err(err) => {
            error!(
                "ferrite_alloc_array_instance({}, {}): {}",
                type_info.name, count, err
            );
            ptr::null_mut()
        }
    }
}

unsafe fn decode(
    entry: &str,
    type_info: *const TypeInfo,
    hint: u32,
) -> Option<(&'static TypeInfo, PlacementHint)> {
    // SAFETY: caller guarantees a non-null pointer is valid for the process.
    let Some(type_info) = (unsafe { type_info.as_ref() }) else {
        error!("{}: null type", entry);
        return None;
    };
    let Some(hint) = PlacementHint::from_raw(hint) else {
        error!("{}: unknown placement hint {}", entry, hint);
        return None;
    };
    Some((type_info, hint))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::ContainerTag;
    use crate::object::ObjectContainer;

    static CELL: TypeInfo = TypeInfo::instance("Cell", 8, &[0]);

    #[test]
    fn test_protocol_accepts_null() {
        unsafe {
            ferrite_add_ref(ptr::null_mut());
            ferrite_release(ptr::null_mut());
            ferrite_update_ref(ptr::null_mut(), ptr::null_mut());
        }
    }

    #[test]
    fn test_protocol_round_trip() {
        let container = ObjectContainer::new(&CELL, ContainerTag::Normal).unwrap();
        let header = container.header().as_ptr();
        unsafe {
            ferrite_add_ref(header);
            ferrite_add_ref(header);
            assert_eq!((*header).ref_count(), 2);
            ferrite_release(header);
            assert_eq!((*header).ref_count(), 1);
            ferrite_release(header);
        }
    }

    #[test]
    fn test_bad_arguments_return_null() {
        unsafe {
            assert!(ferrite_alloc_instance(ptr::null(), 0).is_null());
            assert!(ferrite_alloc_instance(&CELL, 7).is_null());
            assert!(ferrite_alloc_array_instance(ptr::null(), 1, 3).is_null());
        }
    }
}
