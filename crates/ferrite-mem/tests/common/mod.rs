// Shared helpers for the integration tests.
//
// Integration tests run in parallel inside one binary, so every test that
// counts finalizer runs declares its own type and counter.

#![allow(dead_code)]

use ferrite_mem::{ContainerHeader, ObjHeader, release_object, retain_object};
use std::ptr::NonNull;

/// Address of the reference slot at `offset` in an instance payload.
pub fn ref_slot(obj: NonNull<ObjHeader>, offset: usize) -> NonNull<*mut ObjHeader> {
    unsafe { ObjHeader::payload(obj).add(offset).cast() }
}

/// Reads the reference stored at `offset`.
pub fn read_ref(obj: NonNull<ObjHeader>, offset: usize) -> *mut ObjHeader {
    unsafe { ref_slot(obj, offset).as_ptr().read() }
}

/// Owning container of `obj`.
pub fn container_of(obj: NonNull<ObjHeader>) -> NonNull<ContainerHeader> {
    unsafe { ObjHeader::container(obj) }
}

/// Logical reference count of the container owning `obj`.
pub fn ref_count_of(obj: NonNull<ObjHeader>) -> u32 {
    unsafe { container_of(obj).as_ref() }.ref_count()
}

/// Retains the container owning `obj`.
pub fn retain(obj: NonNull<ObjHeader>) {
    unsafe { retain_object(Some(obj)) }
}

/// Releases the container owning `obj`.
pub fn release(obj: NonNull<ObjHeader>) {
    unsafe { release_object(Some(obj)) }
}

/// Frees an object nobody references yet by taking and dropping one
/// reference.
pub fn discard(obj: NonNull<ObjHeader>) {
    retain(obj);
    release(obj);
}
