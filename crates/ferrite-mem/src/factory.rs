//! Factory for arena containers.
//!
//! `ArenaFactory` carries the capacity and tag new arenas are created with,
//! so the facade and scoped allocation can produce arenas without threading
//! configuration through every call site. Arenas are never pooled or reused:
//! each call allocates a fresh block, and dropping the arena frees it.
//!
//! # Examples
//!
//! ```
//! use ferrite_mem::factory::ArenaFactory;
//!
//! let factory = ArenaFactory::new(4096);
//! let mut arena = factory.create_arena().unwrap();
//! assert_eq!(arena.capacity(), 4096);
//! assert!(arena.place(128).is_some());
//! ```

use crate::arena::ArenaContainer;
use crate::error::Result;
use crate::header::ContainerTag;

/// Creates arenas of a fixed capacity and tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaFactory {
    capacity: usize,
    tag: ContainerTag,
}

impl ArenaFactory {
    /// A factory for thread-confined arenas of `capacity` bytes.
    #[must_use]
    pub const fn new(capacity: usize) -> Self {
        Self {
            capacity,
            tag: ContainerTag::Normal,
        }
    }

    /// Sets the tag of arenas created from now on.
    #[must_use]
    pub const fn with_tag(mut self, tag: ContainerTag) -> Self {
        self.tag = tag;
        self
    }

    /// Usable bytes of each arena.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tag of each arena.
    #[must_use]
    pub const fn tag(&self) -> ContainerTag {
        self.tag
    }

    /// Creates a fresh arena.
    ///
    /// # Errors
    ///
    /// See [`ArenaContainer::with_tag`].
    pub fn create_arena(&self) -> Result<ArenaContainer> {
        ArenaContainer::with_tag(self.capacity, self.tag)
    }
}
