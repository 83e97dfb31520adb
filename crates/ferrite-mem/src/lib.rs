//! `ferrite` memory core
//!
//! Every value the `ferrite` runtime hands out lives in a *container*: a
//! block that starts with a reference-counted header and holds either one
//! object or an arena of many. This crate provides:
//!
//! - **Headers**: object, array and container headers with a packed
//!   tag-plus-count word and a back-offset from each object to its container
//! - **Reference counting**: [`add_ref`] / [`release`], thread-confined or
//!   atomic depending on the container's tag, with iterative reclamation
//! - **Containers**: single-object containers and bump-allocated arenas
//! - **Allocation facade**: placement hints mapped to strategies by a
//!   pluggable policy, thread-local arena scopes, a process-wide instance
//! - **C ABI**: `ferrite_*` entry points for generated code
//!
//! Reference cycles are never collected. The [`tracker`] can list what is
//! left alive.
//!
//! # Example
//!
//! ```rust
//! use ferrite_mem::{ContainerTag, ObjectContainer, TypeInfo, add_ref, release};
//!
//! static NODE: TypeInfo = TypeInfo::instance("Node", 16, &[]);
//!
//! let node = ObjectContainer::new(&NODE, ContainerTag::Normal).unwrap();
//! unsafe {
//!     add_ref(Some(node.header()));
//!     // ... use node.place() ...
//!     release(Some(node.header())); // last reference: the block is freed
//! }
//! ```

pub mod arena;
pub mod config;
pub mod container;
pub mod error;
pub mod factory;
pub mod fatal;
pub mod ffi;
pub mod header;
pub mod memory;
pub mod object;
pub mod reclaim;
pub mod refcount;
pub mod stats;
pub mod tracker;
pub mod types;

// Re-export commonly used types
pub use arena::ArenaContainer;
pub use config::{DEFAULT_ARENA_CAPACITY, MemoryConfig};
pub use container::Container;
pub use error::{Error, Result};
pub use factory::ArenaFactory;
pub use header::{
    ArenaContainerHeader, ArrayHeader, CONTAINER_TAG_INCREMENT, CONTAINER_TAG_MASK,
    ContainerHeader, ContainerKind, ContainerOffset, ContainerTag, MAX_CONTAINER_SPAN,
    OBJECT_ALIGNMENT, ObjHeader,
};
pub use memory::{
    ArenaScope, DefaultPolicy, Memory, PlacementHint, PlacementPolicy, Strategy,
    alloc_array_instance, alloc_instance, arena_depth, init_memory, init_memory_with_policy,
    memory,
};
pub use object::ObjectContainer;
pub use refcount::{add_ref, release, release_object, retain_object, update_ref};
pub use stats::{MemoryStats, stats};
pub use types::{Finalizer, TypeInfo, TypeShape};
