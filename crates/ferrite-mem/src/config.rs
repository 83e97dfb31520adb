//! Memory subsystem configuration.
//!
//! [`MemoryConfig`] is read once by [`crate::init_memory`] (or passed to
//! [`crate::Memory::new`] directly). Every field has a default, and each can
//! be overridden from the environment:
//!
//! | Variable | Field | Accepted values |
//! |----------|-------|-----------------|
//! | `FERRITE_ARENA_CAPACITY` | `arena_capacity` | byte count |
//! | `FERRITE_ARENA_SHARED` | `arena_tag` | boolean; `true` selects [`ContainerTag::Shared`] |
//! | `FERRITE_TRACK_LEAKS` | `track_leaks` | boolean |
//! | `FERRITE_LOG` | `log_level` | `error`, `warn`, `info`, `debug`, `trace` |
//!
//! Booleans accept `1`/`0`, `true`/`false`, `yes`/`no` and `on`/`off`.

use crate::error::{Error, Result};
use crate::factory::ArenaFactory;
use crate::header::ContainerTag;
use ferrite_log::Level;

/// Default usable bytes of scoped arenas (64 KiB).
pub const DEFAULT_ARENA_CAPACITY: usize = 64 * 1024;

const ARENA_CAPACITY_VAR: &str = "FERRITE_ARENA_CAPACITY";
const ARENA_SHARED_VAR: &str = "FERRITE_ARENA_SHARED";
const TRACK_LEAKS_VAR: &str = "FERRITE_TRACK_LEAKS";

/// Settings of the memory subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Usable bytes of each arena opened by [`crate::Memory::enter_arena`].
    pub arena_capacity: usize,
    /// Tag of scoped arenas.
    pub arena_tag: ContainerTag,
    /// Record live containers for [`crate::tracker::report_leaks`].
    pub track_leaks: bool,
    /// Log level to install at initialization; `None` keeps the current one.
    pub log_level: Option<Level>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig {
            arena_capacity: DEFAULT_ARENA_CAPACITY,
            arena_tag: ContainerTag::Normal,
            track_leaks: false,
            log_level: None,
        }
    }
}

impl MemoryConfig {
    /// Defaults overridden by the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first variable that does
    /// not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    ///
    /// ```
    /// use ferrite_mem::MemoryConfig;
    ///
    /// let config = MemoryConfig::from_lookup(|key| match key {
    ///     "FERRITE_ARENA_CAPACITY" => Some("4096".to_string()),
    ///     _ => None,
    /// })
    /// .unwrap();
    /// assert_eq!(config.arena_capacity, 4096);
    /// assert!(!config.track_leaks);
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first variable that does
    /// not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = MemoryConfig::default();

        if let Some(value) = lookup(ARENA_CAPACITY_VAR) {
            config.arena_capacity = value
                .trim()
                .parse()
                .map_err(|_| invalid(ARENA_CAPACITY_VAR, &value))?;
        }
        if let Some(value) = lookup(ARENA_SHARED_VAR) {
            config.arena_tag = if parse_bool(ARENA_SHARED_VAR, &value)? {
                ContainerTag::Shared
            } else {
                ContainerTag::Normal
            };
        }
        if let Some(value) = lookup(TRACK_LEAKS_VAR) {
            config.track_leaks = parse_bool(TRACK_LEAKS_VAR, &value)?;
        }
        if let Some(value) = lookup(ferrite_log::ENV_VAR) {
            let level = value
                .parse()
                .map_err(|_| invalid(ferrite_log::ENV_VAR, &value))?;
            config.log_level = Some(level);
        }

        Ok(config)
    }

    /// Sets the scoped arena capacity.
    #[must_use]
    pub fn with_arena_capacity(mut self, capacity: usize) -> Self {
        self.arena_capacity = capacity;
        self
    }

    /// Sets the scoped arena tag.
    #[must_use]
    pub fn with_arena_tag(mut self, tag: ContainerTag) -> Self {
        self.arena_tag = tag;
        self
    }

    /// Enables or disables leak tracking.
    #[must_use]
    pub fn with_leak_tracking(mut self, enabled: bool) -> Self {
        self.track_leaks = enabled;
        self
    }

    /// Sets the log level installed at initialization.
    #[must_use]
    pub fn with_log_level(mut self, level: Level) -> Self {
        self.log_level = Some(level);
        self
    }

    /// A factory producing scoped arenas with these settings.
    #[must_use]
    pub fn arena_factory(&self) -> ArenaFactory {
        ArenaFactory::new(self.arena_capacity).with_tag(self.arena_tag)
    }
}

fn invalid(key: &'static str, value: &str) -> Error {
    Error::InvalidConfig {
        key,
        value: value.to_string(),
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}
