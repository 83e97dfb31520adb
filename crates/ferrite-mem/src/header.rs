//! Object and container headers.
//!
//! Every allocation the runtime hands out is a *container*: one contiguous
//! block that starts with a [`ContainerHeader`] and is followed immediately by
//! the objects it owns. Each object starts with an [`ObjHeader`] (or an
//! [`ArrayHeader`] for arrays) that records its type and the byte distance
//! back to its container header.
//!
//! # Layout
//!
//! ```text
//! single-object container            arena container
//! +----------------------+           +------------------------+
//! | ContainerHeader  (8) |           | ArenaContainerHeader   |
//! +----------------------+           |   ContainerHeader  (8) |
//! | ObjHeader       (16) |           |   current, end         |
//! | payload ...          |           +------------------------+
//! +----------------------+           | ObjHeader | payload    |
//!                                    | ArrayHeader | elements |
//!                                    | ... free ...           |
//!                                    +------------------------+ <- end
//! ```
//!
//! # Counter encoding
//!
//! The container's counter holds a [`ContainerTag`] in its low two bits and a
//! reference count in the remaining bits. Counts move in steps of
//! [`CONTAINER_TAG_INCREMENT`], so plain add/subtract never disturbs the tag.
//! A container whose counter equals its tag bits alone is at *tagged zero*:
//! no outstanding references.

use crate::error::{Error, Result};
use crate::types::TypeInfo;
use std::mem::{offset_of, size_of};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

/// Width of the back-offset stored in every object header.
///
/// Could be made 64-bit for large memory configurations.
pub type ContainerOffset = u32;

/// Largest span, in bytes, of a single container block.
///
/// An object can only live in a container it can address with a
/// [`ContainerOffset`], so no container may be larger than this.
pub const MAX_CONTAINER_SPAN: usize = ContainerOffset::MAX as usize;

/// Alignment of every object placed by the runtime.
pub const OBJECT_ALIGNMENT: usize = 8;

/// Step by which a reference count moves. The tag lives below it.
pub const CONTAINER_TAG_INCREMENT: u32 = 1 << 2;

/// Mask selecting the tag bits of a counter.
pub const CONTAINER_TAG_MASK: u32 = CONTAINER_TAG_INCREMENT - 1;

/// Rounds `value` up to a multiple of `align` (a power of two).
#[inline]
#[must_use]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Reference-counting discipline of a container. Must fit in two bits.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerTag {
    /// Thread-confined container, counted with plain arithmetic.
    Normal = 0,
    /// Not counted at all (constant data, non-escaping frame locals).
    NoCount = 1,
    /// Shared between threads, counted atomically.
    Shared = 2,
}

impl ContainerTag {
    /// The tag's bit pattern, which is also its tagged-zero counter value.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u32 {
        self as u32
    }

    /// Decodes the tag held in the low bits of `counter`.
    ///
    /// The fourth bit pattern is unused and decodes to `None`.
    #[inline]
    #[must_use]
    pub const fn from_counter(counter: u32) -> Option<Self> {
        match counter & CONTAINER_TAG_MASK {
            0 => Some(ContainerTag::Normal),
            1 => Some(ContainerTag::NoCount),
            2 => Some(ContainerTag::Shared),
            _ => None,
        }
    }
}

/// Which strategy owns a container block.
///
/// Reclamation needs this to recover the block layout from a bare header.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    /// One object or array; freed when its count returns to tagged zero.
    Object = 0,
    /// A bump region; freed only by its owning handle.
    Arena = 1,
}

/// Header at the start of every container.
///
/// The counter is the only mutable field. The kind byte is written once at
/// creation and sits in what would otherwise be alignment padding, so the
/// payload still starts [`size_of::<ContainerHeader>()`] bytes in.
#[repr(C, align(8))]
pub struct ContainerHeader {
    ref_count: AtomicU32,
    kind: ContainerKind,
    _reserved: [u8; 3],
}

const _: () = assert!(size_of::<ContainerHeader>() == 8);

impl ContainerHeader {
    /// A header at tagged zero.
    #[must_use]
    pub const fn new(tag: ContainerTag, kind: ContainerKind) -> Self {
        ContainerHeader {
            ref_count: AtomicU32::new(tag.bits()),
            kind,
            _reserved: [0; 3],
        }
    }

    #[inline]
    pub(crate) fn counter(&self) -> &AtomicU32 {
        &self.ref_count
    }

    /// Raw counter value: tag bits plus count times the increment.
    #[inline]
    #[must_use]
    pub fn raw(&self) -> u32 {
        self.ref_count.load(Ordering::Relaxed)
    }

    /// The container's tag. Unused bit patterns read as untracked.
    #[inline]
    #[must_use]
    pub fn tag(&self) -> ContainerTag {
        ContainerTag::from_counter(self.raw()).unwrap_or(ContainerTag::NoCount)
    }

    /// Logical number of outstanding references.
    #[inline]
    #[must_use]
    pub fn ref_count(&self) -> u32 {
        self.raw() / CONTAINER_TAG_INCREMENT
    }

    /// Returns `true` if no references are outstanding.
    #[inline]
    #[must_use]
    pub fn is_tagged_zero(&self) -> bool {
        (self.raw() & !CONTAINER_TAG_MASK) == 0
    }

    /// The strategy that owns this block.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ContainerKind {
        self.kind
    }
}

impl std::fmt::Debug for ContainerHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerHeader")
            .field("kind", &self.kind)
            .field("tag", &self.tag())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

/// Header of an arena container: the common header plus a bump cursor.
///
/// `start <= current <= end` holds at all times, where `start` is the first
/// byte after this header.
#[repr(C)]
pub struct ArenaContainerHeader {
    pub(crate) base: ContainerHeader,
    /// Next free byte.
    pub(crate) current: *mut u8,
    /// One past the last usable byte.
    pub(crate) end: *mut u8,
}

const _: () = assert!(offset_of!(ArenaContainerHeader, base) == 0);

/// Header of every object.
#[repr(C)]
pub struct ObjHeader {
    type_info: *const TypeInfo,
    container_offset_negative: ContainerOffset,
}

/// Header of array objects.
///
/// Shares its first two fields with [`ObjHeader`] and keeps the element count
/// in the space the object header leaves as padding, so an array header can
/// be viewed as an object header. On 32-bit targets there is no such
/// padding and the count is followed by 4 bytes of it instead.
#[repr(C, align(8))]
pub struct ArrayHeader {
    type_info: *const TypeInfo,
    container_offset_negative: ContainerOffset,
    count: u32,
}

const _: () = {
    assert!(offset_of!(ArrayHeader, type_info) == offset_of!(ObjHeader, type_info));
    assert!(
        offset_of!(ArrayHeader, container_offset_negative)
            == offset_of!(ObjHeader, container_offset_negative)
    );
    assert!(size_of::<ArrayHeader>() % OBJECT_ALIGNMENT == 0);
    assert!(size_of::<ObjHeader>() % OBJECT_ALIGNMENT == 0);
};

impl ObjHeader {
    /// Stamps type metadata and the back-offset into a freshly placed object.
    ///
    /// Nothing else in the header is ever written after this.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OffsetOverflow`] if `obj` does not lie within
    /// [`MAX_CONTAINER_SPAN`] bytes after `container`. The object is not
    /// touched in that case.
    ///
    /// # Safety
    ///
    /// `obj` must be valid for writes of an `ObjHeader` and aligned to
    /// [`OBJECT_ALIGNMENT`]; it must belong to the block headed by
    /// `container`.
    pub unsafe fn set_meta(
        obj: NonNull<ObjHeader>,
        container: NonNull<ContainerHeader>,
        type_info: &'static TypeInfo,
    ) -> Result<()> {
        let distance = obj.addr().get().wrapping_sub(container.addr().get());
        let offset = ContainerOffset::try_from(distance)
            .map_err(|_| Error::OffsetOverflow { distance })?;

        // SAFETY: the caller guarantees `obj` is valid for writes.
        unsafe {
            obj.as_ptr().write(ObjHeader {
                type_info,
                container_offset_negative: offset,
            });
        }
        Ok(())
    }

    /// The object's type.
    #[inline]
    #[must_use]
    pub fn type_info(&self) -> &'static TypeInfo {
        // SAFETY: only `set_meta` writes this field, from a `&'static`.
        unsafe { &*self.type_info }
    }

    /// Byte distance from the owning container header to this object.
    #[inline]
    #[must_use]
    pub fn container_offset(&self) -> ContainerOffset {
        self.container_offset_negative
    }

    /// Recovers the owning container header from the stored back-offset.
    ///
    /// # Safety
    ///
    /// `this` must point to a stamped object whose container is still live.
    #[inline]
    #[must_use]
    pub unsafe fn container(this: NonNull<ObjHeader>) -> NonNull<ContainerHeader> {
        // SAFETY: caller guarantees `this` is a stamped, live object.
        let offset = unsafe { this.as_ref().container_offset_negative } as usize;
        // SAFETY: the container header lies `offset` bytes before the object
        // in the same allocation, so the result is in bounds and non-null.
        unsafe { this.cast::<u8>().sub(offset).cast() }
    }

    /// First byte of an instance's fields.
    ///
    /// # Safety
    ///
    /// `this` must point to a placed instance (not an array).
    #[inline]
    #[must_use]
    pub unsafe fn payload(this: NonNull<ObjHeader>) -> NonNull<u8> {
        // SAFETY: placement reserved the payload right after the header.
        unsafe { this.cast::<u8>().add(size_of::<ObjHeader>()) }
    }

    /// Calls `f` with the address of every reference slot of this object,
    /// as described by its type.
    ///
    /// # Safety
    ///
    /// `this` must point to a stamped, live object whose storage matches its
    /// type.
    pub unsafe fn for_each_ref(
        this: NonNull<ObjHeader>,
        mut f: impl FnMut(NonNull<*mut ObjHeader>),
    ) {
        // SAFETY: caller guarantees `this` is stamped and live.
        let type_info = unsafe { this.as_ref().type_info() };
        if type_info.ref_offsets.is_empty() {
            return;
        }

        match type_info.shape {
            crate::types::TypeShape::Instance { .. } => {
                // SAFETY: `this` is an instance.
                let base = unsafe { ObjHeader::payload(this) };
                for &offset in type_info.ref_offsets {
                    // SAFETY: offsets lie within the instance payload.
                    f(unsafe { base.add(offset as usize).cast() });
                }
            }
            crate::types::TypeShape::Array { element_size } => {
                let array = this.cast::<ArrayHeader>();
                // SAFETY: array types are always placed with an ArrayHeader.
                let count = unsafe { array.as_ref().count() } as usize;
                let base = unsafe { ArrayHeader::elements(array) };
                for index in 0..count {
                    let element = index * element_size as usize;
                    for &offset in type_info.ref_offsets {
                        // SAFETY: the slot lies inside element `index`.
                        f(unsafe { base.add(element + offset as usize).cast() });
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for ObjHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjHeader")
            .field("type", &self.type_info().name)
            .field("container_offset", &self.container_offset_negative)
            .finish()
    }
}

impl ArrayHeader {
    /// Writes the element count of a freshly stamped array.
    ///
    /// # Safety
    ///
    /// `this` must be valid for writes and already stamped by
    /// [`ObjHeader::set_meta`].
    #[inline]
    pub(crate) unsafe fn set_count(this: NonNull<ArrayHeader>, count: u32) {
        // SAFETY: caller guarantees validity; only the count field is written.
        unsafe {
            (&raw mut (*this.as_ptr()).count).write(count);
        }
    }

    /// Number of elements.
    #[inline]
    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// The array viewed as a plain object header.
    #[inline]
    #[must_use]
    pub fn as_object(this: NonNull<ArrayHeader>) -> NonNull<ObjHeader> {
        this.cast()
    }

    /// First byte of the element storage.
    ///
    /// # Safety
    ///
    /// `this` must point to a placed array.
    #[inline]
    #[must_use]
    pub unsafe fn elements(this: NonNull<ArrayHeader>) -> NonNull<u8> {
        // SAFETY: placement reserved the elements right after the header.
        unsafe { this.cast::<u8>().add(size_of::<ArrayHeader>()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::MaybeUninit;

    static WORD: TypeInfo = TypeInfo::instance("Word", 8, &[]);
    static PAIR: TypeInfo = TypeInfo::instance("Pair", 16, &[0, 8]);
    static REFS: TypeInfo = TypeInfo::array("Array<Ref>", 8, &[0]);

    #[repr(C, align(8))]
    struct Block([u8; 128]);

    #[test]
    fn test_tag_constants() {
        assert_eq!(CONTAINER_TAG_INCREMENT, 4);
        assert_eq!(CONTAINER_TAG_MASK, 3);
        assert_eq!(ContainerTag::Normal.bits(), 0);
        assert_eq!(ContainerTag::NoCount.bits(), 1);
        assert_eq!(ContainerTag::Shared.bits(), 2);
    }

    #[test]
    fn test_tag_decoding_ignores_count_bits() {
        for tag in [ContainerTag::Normal, ContainerTag::NoCount, ContainerTag::Shared] {
            let counter = tag.bits() + 7 * CONTAINER_TAG_INCREMENT;
            assert_eq!(ContainerTag::from_counter(counter), Some(tag));
        }
        assert_eq!(ContainerTag::from_counter(3), None);
    }

    #[test]
    fn test_new_header_is_tagged_zero() {
        let header = ContainerHeader::new(ContainerTag::Shared, ContainerKind::Object);
        assert_eq!(header.raw(), ContainerTag::Shared.bits());
        assert_eq!(header.ref_count(), 0);
        assert!(header.is_tagged_zero());
        assert_eq!(header.tag(), ContainerTag::Shared);
        assert_eq!(header.kind(), ContainerKind::Object);

        header.counter().fetch_add(CONTAINER_TAG_INCREMENT, Ordering::Relaxed);
        assert_eq!(header.ref_count(), 1);
        assert!(!header.is_tagged_zero());
        assert_eq!(header.tag(), ContainerTag::Shared);
    }

    #[test]
    fn test_array_header_fits_in_object_header_padding() {
        if cfg!(target_pointer_width = "64") {
            assert_eq!(size_of::<ObjHeader>(), 16);
            assert_eq!(size_of::<ArrayHeader>(), 16);
        }
    }

    #[test]
    fn test_headers_keep_elements_aligned() {
        assert_eq!(size_of::<ArrayHeader>() % OBJECT_ALIGNMENT, 0);
        assert_eq!(size_of::<ObjHeader>() % OBJECT_ALIGNMENT, 0);
        assert!(align_of::<ArrayHeader>() >= align_of::<ObjHeader>());
    }

    #[test]
    fn test_set_meta_records_back_offset() {
        let mut block = MaybeUninit::<Block>::uninit();
        let base = NonNull::new(block.as_mut_ptr().cast::<u8>()).unwrap();
        let container = base.cast::<ContainerHeader>();
        let obj = unsafe { base.add(24) }.cast::<ObjHeader>();

        unsafe {
            ObjHeader::set_meta(obj, container, &WORD).unwrap();
            assert_eq!(obj.as_ref().container_offset(), 24);
            assert_eq!(obj.as_ref().type_info().name, "Word");
            assert_eq!(ObjHeader::container(obj), container);
            assert_eq!(
                container.addr().get() + obj.as_ref().container_offset() as usize,
                obj.addr().get()
            );
        }
    }

    #[test]
    fn test_set_meta_rejects_object_before_container() {
        let mut block = MaybeUninit::<Block>::uninit();
        let base = NonNull::new(block.as_mut_ptr().cast::<u8>()).unwrap();
        let container = unsafe { base.add(64) }.cast::<ContainerHeader>();
        let obj = base.cast::<ObjHeader>();

        let result = unsafe { ObjHeader::set_meta(obj, container, &WORD) };
        assert!(matches!(result, Err(Error::OffsetOverflow { .. })));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_set_meta_rejects_distance_beyond_offset_width() {
        let mut block = MaybeUninit::<Block>::uninit();
        let obj = NonNull::new(block.as_mut_ptr().cast::<ObjHeader>()).unwrap();
        // Never dereferenced: set_meta fails before writing anything.
        let far = obj
            .as_ptr()
            .cast::<u8>()
            .wrapping_sub(MAX_CONTAINER_SPAN + 1)
            .cast::<ContainerHeader>();
        let far = NonNull::new(far).unwrap();

        let result = unsafe { ObjHeader::set_meta(obj, far, &WORD) };
        assert_eq!(
            result,
            Err(Error::OffsetOverflow {
                distance: MAX_CONTAINER_SPAN + 1
            })
        );
    }

    #[test]
    fn test_for_each_ref_walks_instance_slots() {
        let mut block = MaybeUninit::<Block>::uninit();
        let base = NonNull::new(block.as_mut_ptr().cast::<u8>()).unwrap();
        let container = base.cast::<ContainerHeader>();
        let obj = unsafe { base.add(8) }.cast::<ObjHeader>();

        let mut slots = Vec::new();
        unsafe {
            ObjHeader::set_meta(obj, container, &PAIR).unwrap();
            ObjHeader::for_each_ref(obj, |slot| slots.push(slot.cast::<u8>()));
            let payload = ObjHeader::payload(obj);
            assert_eq!(slots, vec![payload, payload.add(8)]);
        }
    }

    #[test]
    fn test_for_each_ref_walks_array_elements() {
        let mut block = MaybeUninit::<Block>::uninit();
        let base = NonNull::new(block.as_mut_ptr().cast::<u8>()).unwrap();
        let container = base.cast::<ContainerHeader>();
        let array = unsafe { base.add(8) }.cast::<ArrayHeader>();

        let mut visited = 0;
        unsafe {
            ObjHeader::set_meta(ArrayHeader::as_object(array), container, &REFS).unwrap();
            ArrayHeader::set_count(array, 4);
            assert_eq!(array.as_ref().count(), 4);

            let elements = ArrayHeader::elements(array);
            ObjHeader::for_each_ref(ArrayHeader::as_object(array), |slot| {
                assert_eq!(slot.cast::<u8>(), elements.add(visited * 8));
                visited += 1;
            });
        }
        assert_eq!(visited, 4);
    }
}
