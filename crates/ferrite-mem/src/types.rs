//! Type metadata consumed by placement and destruction.
//!
//! The registry that produces these descriptors belongs to the compiler and
//! loader. The memory core only needs three things from a type: how much
//! storage an instance (or array element) takes, where its outgoing
//! references live so destruction can release them, and an optional
//! finalizer.
//!
//! Descriptors are `'static` and shared; every object header points at one.
//!
//! ```
//! use ferrite_mem::types::TypeInfo;
//!
//! // A node with a payload word and one reference field at offset 8.
//! static NODE: TypeInfo = TypeInfo::instance("Node", 16, &[8]);
//! // An array whose elements are references.
//! static NODE_ARRAY: TypeInfo = TypeInfo::array("Array<Node>", 8, &[0]);
//!
//! assert_eq!(NODE.storage_size(0), Some(32));
//! assert_eq!(NODE_ARRAY.storage_size(3), Some(40));
//! ```

use crate::header::{ArrayHeader, OBJECT_ALIGNMENT, ObjHeader};
use std::mem::size_of;
use std::ptr::NonNull;

/// Hook run once per object right before its references are released.
pub type Finalizer = fn(NonNull<ObjHeader>);

/// Storage shape of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeShape {
    /// A fixed-size instance; `size` excludes the object header.
    Instance {
        /// Payload bytes after the [`ObjHeader`].
        size: u32,
    },
    /// A run of homogeneous elements following an [`ArrayHeader`].
    Array {
        /// Bytes per element.
        element_size: u32,
    },
}

/// Shared, read-only description of a runtime type.
#[derive(Debug)]
pub struct TypeInfo {
    /// Human-readable name, used in diagnostics only.
    pub name: &'static str,
    /// Storage shape.
    pub shape: TypeShape,
    /// Byte offsets of reference slots (`*mut ObjHeader`) relative to the
    /// payload of an instance, or to the start of each element of an array.
    pub ref_offsets: &'static [u32],
    /// Optional finalizer.
    pub finalizer: Option<Finalizer>,
}

impl TypeInfo {
    /// Describes an instance type with `size` payload bytes.
    #[must_use]
    pub const fn instance(
        name: &'static str,
        size: u32,
        ref_offsets: &'static [u32],
    ) -> Self {
        TypeInfo {
            name,
            shape: TypeShape::Instance { size },
            ref_offsets,
            finalizer: None,
        }
    }

    /// Describes an array type with `element_size` bytes per element.
    #[must_use]
    pub const fn array(
        name: &'static str,
        element_size: u32,
        ref_offsets: &'static [u32],
    ) -> Self {
        TypeInfo {
            name,
            shape: TypeShape::Array { element_size },
            ref_offsets,
            finalizer: None,
        }
    }

    /// Attaches a finalizer.
    #[must_use]
    pub const fn with_finalizer(mut self, finalizer: Finalizer) -> Self {
        self.finalizer = Some(finalizer);
        self
    }

    /// Returns `true` for array types.
    #[must_use]
    pub const fn is_array(&self) -> bool {
        matches!(self.shape, TypeShape::Array { .. })
    }

    /// Size of the header that precedes objects of this type.
    #[must_use]
    pub const fn header_size(&self) -> usize {
        match self.shape {
            TypeShape::Instance { .. } => size_of::<ObjHeader>(),
            TypeShape::Array { .. } => size_of::<ArrayHeader>(),
        }
    }

    /// Total bytes one object of this type occupies, header included,
    /// rounded up to [`OBJECT_ALIGNMENT`].
    ///
    /// `count` is the element count for arrays and ignored for instances.
    /// Returns `None` if the size does not fit in `usize`.
    #[must_use]
    pub fn storage_size(&self, count: u32) -> Option<usize> {
        let body = match self.shape {
            TypeShape::Instance { size } => size as usize,
            TypeShape::Array { element_size } => {
                (element_size as usize).checked_mul(count as usize)?
            }
        };
        let padded = self
            .header_size()
            .checked_add(body)?
            .checked_add(OBJECT_ALIGNMENT - 1)?;
        Some(padded & !(OBJECT_ALIGNMENT - 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::align_up;

    static POINT: TypeInfo = TypeInfo::instance("Point", 16, &[]);
    static ODD: TypeInfo = TypeInfo::instance("Odd", 5, &[]);
    static BYTES: TypeInfo = TypeInfo::array("ByteArray", 1, &[]);

    fn noop(_: NonNull<ObjHeader>) {}

    #[test]
    fn test_instance_storage_includes_header() {
        assert_eq!(POINT.storage_size(0), Some(size_of::<ObjHeader>() + 16));
        // Count is ignored for instances.
        assert_eq!(POINT.storage_size(99), POINT.storage_size(0));
    }

    #[test]
    fn test_storage_is_rounded_to_alignment() {
        let size = ODD.storage_size(0).unwrap();
        assert_eq!(size % OBJECT_ALIGNMENT, 0);
        assert!(size >= size_of::<ObjHeader>() + 5);

        assert_eq!(
            BYTES.storage_size(3),
            Some(align_up(size_of::<ArrayHeader>() + 3, OBJECT_ALIGNMENT))
        );
        assert_eq!(BYTES.storage_size(0), Some(size_of::<ArrayHeader>()));
    }

    #[test]
    fn test_shape_queries() {
        assert!(!POINT.is_array());
        assert!(BYTES.is_array());
        assert_eq!(BYTES.header_size(), size_of::<ArrayHeader>());
    }

    #[test]
    fn test_finalizer_builder() {
        let info = TypeInfo::instance("Finalized", 8, &[]).with_finalizer(noop);
        assert!(info.finalizer.is_some());
        assert!(POINT.finalizer.is_none());
    }
}
