//! Error types for the `ferrite` memory core.
//!
//! Only recoverable failures live here. Invariant violations (disposing a
//! container that is still referenced) never produce an `Error`; they abort
//! the process through [`crate::fatal`].

use std::fmt;

/// Recoverable failures of container creation, placement and the facade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The system allocator returned null.
    OutOfMemory {
        /// Size of the block that could not be allocated.
        size: usize,
    },

    /// An arena cannot satisfy a placement.
    ArenaFull {
        /// The requested placement size.
        requested: usize,
        /// Bytes left between the cursor and the end of the arena.
        available: usize,
    },

    /// A container block would be larger than a back-offset can address.
    CapacityTooLarge {
        /// The requested block size.
        size: usize,
        /// The largest span a container may have.
        max: usize,
    },

    /// An object lies too far from its container for the back-offset field.
    OffsetOverflow {
        /// Distance in bytes from the container header to the object.
        distance: usize,
    },

    /// Object size arithmetic overflowed (huge element counts).
    SizeOverflow,

    /// An allocation entry point ran before [`crate::init_memory`].
    NotInitialized,

    /// [`crate::init_memory`] ran more than once.
    AlreadyInitialized,

    /// A configuration value could not be parsed.
    InvalidConfig {
        /// The configuration key.
        key: &'static str,
        /// The rejected value.
        value: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutOfMemory { size } => {
                write!(f, "Out of memory allocating {size} bytes")
            }
            Error::ArenaFull {
                requested,
                available,
            } => {
                write!(
                    f,
                    "Arena full: requested {requested} bytes, available {available} bytes"
                )
            }
            Error::CapacityTooLarge { size, max } => {
                write!(
                    f,
                    "Container of {size} bytes exceeds the maximum span of {max} bytes"
                )
            }
            Error::OffsetOverflow { distance } => {
                write!(
                    f,
                    "Object lies {distance} bytes from its container, beyond the offset width"
                )
            }
            Error::SizeOverflow => write!(f, "Object size overflow"),
            Error::NotInitialized => {
                write!(f, "Memory subsystem used before initialization")
            }
            Error::AlreadyInitialized => {
                write!(f, "Memory subsystem already initialized")
            }
            Error::InvalidConfig { key, value } => {
                write!(f, "Invalid value for {key}: {value:?}")
            }
        }
    }
}

impl std::error::Error for Error {}

/// Result type for memory core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::ArenaFull {
                requested: 20,
                available: 14
            }
            .to_string(),
            "Arena full: requested 20 bytes, available 14 bytes"
        );
        assert_eq!(
            Error::InvalidConfig {
                key: "FERRITE_ARENA_CAPACITY",
                value: "lots".to_string()
            }
            .to_string(),
            "Invalid value for FERRITE_ARENA_CAPACITY: \"lots\""
        );
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(Error::NotInitialized, Error::NotInitialized);
        assert_ne!(
            Error::OutOfMemory { size: 8 },
            Error::OutOfMemory { size: 16 }
        );
    }
}
