//! Allocation facade.
//!
//! Emitted code never picks a container strategy itself. It asks for "one
//! instance of this type" or "an array of N of this type" together with a
//! [`PlacementHint`], and [`Memory`] maps the hint to a strategy through its
//! [`PlacementPolicy`].
//!
//! # Arena scopes
//!
//! Arena placement uses the innermost arena of the calling thread, opened
//! with [`Memory::enter_arena`]. The returned [`ArenaScope`] closes that
//! arena when dropped, which aborts the process if anything still references
//! it. Without an open scope, or once the arena is full, arena-hinted
//! allocations fall back to a thread-confined single-object container.
//!
//! ```
//! use ferrite_mem::{Memory, MemoryConfig, ObjHeader, PlacementHint, TypeInfo};
//!
//! static POINT: TypeInfo = TypeInfo::instance("Point", 16, &[]);
//!
//! let memory = Memory::new(MemoryConfig::default());
//! let scope = memory.enter_arena().unwrap();
//! let point = memory.alloc_instance(&POINT, PlacementHint::Arena).unwrap();
//! assert_eq!(unsafe { ObjHeader::container(point) }, scope.header());
//! drop(scope);
//! ```
//!
//! # Process-wide facade
//!
//! [`init_memory`] installs one `Memory` for the whole process; the free
//! functions [`alloc_instance`] and [`alloc_array_instance`] forward to it.
//! It is never torn down.

use crate::arena::ArenaContainer;
use crate::config::MemoryConfig;
use crate::error::{Error, Result};
use crate::factory::ArenaFactory;
use crate::header::{ArrayHeader, ContainerHeader, ContainerTag, ObjHeader};
use crate::object::ObjectContainer;
use crate::stats::COUNTERS;
use crate::tracker;
use crate::types::TypeInfo;
use ferrite_log::{debug, info};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// Placement policy
// ============================================================================

/// Where the caller intends an allocation to live.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlacementHint {
    /// Local to the current frame.
    Frame = 0,
    /// Reachable from anywhere, possibly from several threads.
    Global = 1,
    /// Inside the current arena scope.
    Arena = 2,
}

impl PlacementHint {
    /// Decodes a hint passed across the C ABI.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(PlacementHint::Frame),
            1 => Some(PlacementHint::Global),
            2 => Some(PlacementHint::Arena),
            _ => None,
        }
    }
}

/// A concrete container strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// A fresh single-object container with this tag.
    Single(ContainerTag),
    /// The calling thread's innermost arena.
    CurrentArena,
}

/// Maps placement hints to container strategies.
pub trait PlacementPolicy: Send + Sync {
    /// Chooses the strategy for one allocation of `type_info`.
    fn strategy(&self, hint: PlacementHint, type_info: &'static TypeInfo) -> Strategy;
}

/// The stock policy.
///
/// | Hint | Strategy |
/// |------|----------|
/// | `Frame` | `Single(Normal)` |
/// | `Global` | `Single(Shared)` |
/// | `Arena` | `CurrentArena` |
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPolicy;

impl PlacementPolicy for DefaultPolicy {
    fn strategy(&self, hint: PlacementHint, _type_info: &'static TypeInfo) -> Strategy {
        match hint {
            PlacementHint::Frame => Strategy::Single(ContainerTag::Normal),
            PlacementHint::Global => Strategy::Single(ContainerTag::Shared),
            PlacementHint::Arena => Strategy::CurrentArena,
        }
    }
}

// ============================================================================
// Arena scopes
// ============================================================================

// One open arena. `arena` is empty while the arena is lent to
// `ArenaScope::with_arena`.
struct OpenArena {
    id: u64,
    arena: Option<ArenaContainer>,
}

// Open arenas of this thread, innermost last.
thread_local! {
    static ARENA_STACK: RefCell<Vec<OpenArena>> = const { RefCell::new(Vec::new()) };
}

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// Guard for an arena opened with [`Memory::enter_arena`].
///
/// Dropping the guard closes the arena (and any arena opened inside it that
/// is still open). Closing an arena that is still referenced aborts.
///
/// The guard is tied to the thread that opened it.
#[must_use = "the arena closes as soon as the scope is dropped"]
pub struct ArenaScope {
    id: u64,
    depth: usize,
    header: NonNull<ContainerHeader>,
    _not_send: PhantomData<*const ()>,
}

impl ArenaScope {
    /// Header of this scope's arena.
    #[must_use]
    pub fn header(&self) -> NonNull<ContainerHeader> {
        self.header
    }

    /// Nesting depth, starting at 1 for the outermost scope.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Runs `f` with this scope's arena, for direct placement.
    ///
    /// While `f` runs the arena is taken off the thread's stack, so
    /// arena-hinted allocations made from `f` fall back to single-object
    /// containers. `f` may open and close scopes of its own.
    ///
    /// Returns `None` if the arena has already been closed by an outer
    /// scope, or if it is already lent to an enclosing `with_arena`.
    pub fn with_arena<R>(&self, f: impl FnOnce(&mut ArenaContainer) -> R) -> Option<R> {
        let mut arena = ARENA_STACK.with_borrow_mut(|stack| {
            self.slot(stack).and_then(|open| open.arena.take())
        })?;

        let result = f(&mut arena);

        let orphan = ARENA_STACK.with_borrow_mut(|stack| match self.slot(stack) {
            Some(open) => {
                open.arena = Some(arena);
                None
            }
            None => Some(arena),
        });
        // An outer scope closed while `f` ran; the arena goes with it.
        drop(orphan);
        Some(result)
    }

    fn slot<'a>(&self, stack: &'a mut [OpenArena]) -> Option<&'a mut OpenArena> {
        stack
            .get_mut(self.depth - 1)
            .filter(|open| open.id == self.id)
    }
}

impl Drop for ArenaScope {
    fn drop(&mut self) {
        let closed = ARENA_STACK.with_borrow_mut(|stack| {
            if self.slot(stack).is_some() {
                stack.split_off(self.depth - 1)
            } else {
                Vec::new()
            }
        });
        // Teardown may run finalizers, which may allocate; keep it outside
        // the borrow.
        for open in closed.into_iter().rev() {
            drop(open.arena);
        }
    }
}

impl std::fmt::Debug for ArenaScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArenaScope")
            .field("id", &self.id)
            .field("depth", &self.depth)
            .field("header", &self.header)
            .finish()
    }
}

/// Number of arenas open on the calling thread.
#[must_use]
pub fn arena_depth() -> usize {
    ARENA_STACK.with_borrow(Vec::len)
}

fn place_in_current_arena(
    type_info: &'static TypeInfo,
    count: u32,
) -> Option<NonNull<ObjHeader>> {
    ARENA_STACK.with_borrow_mut(|stack| {
        stack
            .last_mut()?
            .arena
            .as_mut()?
            .place_typed(type_info, count)
    })
}

// ============================================================================
// Memory
// ============================================================================

/// The allocation facade.
pub struct Memory {
    config: MemoryConfig,
    factory: ArenaFactory,
    policy: Box<dyn PlacementPolicy>,
}

impl Memory {
    /// A facade using [`DefaultPolicy`].
    ///
    /// Process-wide settings in `config` (log level, leak tracking) are only
    /// applied by [`init_memory`].
    #[must_use]
    pub fn new(config: MemoryConfig) -> Self {
        Self::with_policy(config, DefaultPolicy)
    }

    /// A facade using a custom placement policy.
    #[must_use]
    pub fn with_policy(config: MemoryConfig, policy: impl PlacementPolicy + 'static) -> Self {
        Memory {
            factory: config.arena_factory(),
            config,
            policy: Box::new(policy),
        }
    }

    /// The configuration this facade was built with.
    #[must_use]
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Allocates one instance of `type_info`.
    ///
    /// The object is stamped and its fields are zeroed. Its container is at
    /// tagged zero: the caller owns no reference until it retains one.
    ///
    /// # Errors
    ///
    /// Any error of [`ObjectContainer::new`].
    pub fn alloc_instance(
        &self,
        type_info: &'static TypeInfo,
        hint: PlacementHint,
    ) -> Result<NonNull<ObjHeader>> {
        self.allocate(type_info, hint, 0)
    }

    /// Allocates an array of `count` elements of `type_info`.
    ///
    /// # Errors
    ///
    /// Any error of [`ObjectContainer::with_elements`].
    pub fn alloc_array_instance(
        &self,
        type_info: &'static TypeInfo,
        hint: PlacementHint,
        count: u32,
    ) -> Result<NonNull<ArrayHeader>> {
        self.allocate(type_info, hint, count).map(NonNull::cast)
    }

    fn allocate(
        &self,
        type_info: &'static TypeInfo,
        hint: PlacementHint,
        count: u32,
    ) -> Result<NonNull<ObjHeader>> {
        let tag = match self.policy.strategy(hint, type_info) {
            Strategy::Single(tag) => tag,
            Strategy::CurrentArena => {
                if let Some(obj) = place_in_current_arena(type_info, count) {
                    return Ok(obj);
                }
                COUNTERS.arena_fallback();
                debug!(
                    "no arena room for {}; using a single-object container",
                    type_info.name
                );
                ContainerTag::Normal
            }
        };
        Ok(ObjectContainer::with_elements(type_info, tag, count)?.place())
    }

    /// Opens an arena of the configured capacity on the calling thread.
    ///
    /// # Errors
    ///
    /// Any error of [`ArenaContainer::with_tag`].
    pub fn enter_arena(&self) -> Result<ArenaScope> {
        Self::push_arena(self.factory.create_arena()?)
    }

    /// Opens an arena of `capacity` bytes on the calling thread.
    ///
    /// # Errors
    ///
    /// Any error of [`ArenaContainer::with_tag`].
    pub fn enter_arena_with_capacity(&self, capacity: usize) -> Result<ArenaScope> {
        Self::push_arena(ArenaContainer::with_tag(capacity, self.factory.tag())?)
    }

    fn push_arena(arena: ArenaContainer) -> Result<ArenaScope> {
        let header = arena.header();
        let id = NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed);
        let depth = ARENA_STACK.with_borrow_mut(|stack| {
            stack.push(OpenArena {
                id,
                arena: Some(arena),
            });
            stack.len()
        });
        debug!("entered arena scope {} ({:p})", depth, header);
        Ok(ArenaScope {
            id,
            depth,
            header,
            _not_send: PhantomData,
        })
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Process-wide facade
// ============================================================================

static MEMORY: OnceLock<Memory> = OnceLock::new();

/// Initializes the process-wide facade with [`DefaultPolicy`].
///
/// # Errors
///
/// Returns [`Error::AlreadyInitialized`] on every call after the first.
pub fn init_memory(config: MemoryConfig) -> Result<&'static Memory> {
    init_memory_with_policy(config, DefaultPolicy)
}

/// Initializes the process-wide facade with a custom placement policy.
///
/// Applies the configured log level and leak tracking.
///
/// # Errors
///
/// Returns [`Error::AlreadyInitialized`] on every call after the first.
pub fn init_memory_with_policy(
    config: MemoryConfig,
    policy: impl PlacementPolicy + 'static,
) -> Result<&'static Memory> {
    let mut installed = false;
    let memory = MEMORY.get_or_init(|| {
        installed = true;
        Memory::with_policy(config, policy)
    });
    if !installed {
        return Err(Error::AlreadyInitialized);
    }

    if let Some(level) = memory.config.log_level {
        ferrite_log::set_level(level);
    }
    tracker::set_enabled(memory.config.track_leaks);
    info!(
        "memory initialized (arena capacity {}, leak tracking {})",
        memory.config.arena_capacity,
        if memory.config.track_leaks { "on" } else { "off" }
    );
    Ok(memory)
}

/// The process-wide facade.
///
/// # Errors
///
/// Returns [`Error::NotInitialized`] before [`init_memory`].
pub fn memory() -> Result<&'static Memory> {
    MEMORY.get().ok_or(Error::NotInitialized)
}

/// [`Memory::alloc_instance`] on the process-wide facade.
///
/// # Errors
///
/// [`Error::NotInitialized`] before [`init_memory`], otherwise as for
/// [`Memory::alloc_instance`].
pub fn alloc_instance(
    type_info: &'static TypeInfo,
    hint: PlacementHint,
) -> Result<NonNull<ObjHeader>> {
    memory()?.alloc_instance(type_info, hint)
}

/// [`Memory::alloc_array_instance`] on the process-wide facade.
///
/// # Errors
///
/// [`Error::NotInitialized`] before [`init_memory`], otherwise as for
/// [`Memory::alloc_array_instance`].
pub fn alloc_array_instance(
    type_info: &'static TypeInfo,
    hint: PlacementHint,
    count: u32,
) -> Result<NonNull<ArrayHeader>> {
    memory()?.alloc_array_instance(type_info, hint, count)
}
