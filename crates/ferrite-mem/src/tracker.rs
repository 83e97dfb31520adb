//! Live-container tracking.
//!
//! When enabled, every container creation is recorded in a map keyed by the
//! header address and every destruction removes its entry. Whatever remains
//! is either still in use or leaked, typically through a reference cycle,
//! which pure reference counting never collects.
//!
//! Tracking is off by default and costs one relaxed load per allocation when
//! disabled. With the `fatal-backtrace` feature each record also captures
//! the allocation backtrace.

use crate::header::{ContainerHeader, ContainerKind};
use ferrite_log::warn;
use fxhash::FxHashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

static ENABLED: AtomicBool = AtomicBool::new(false);
static LIVE: OnceLock<Mutex<FxHashMap<usize, LiveContainer>>> = OnceLock::new();

/// A container that has been created and not yet freed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveContainer {
    /// Address of the container header.
    pub address: usize,
    /// Allocation strategy.
    pub kind: ContainerKind,
    /// Type of the first object, or `"<arena>"`.
    pub type_name: &'static str,
    /// Size of the block in bytes.
    pub size: usize,
    /// Allocation backtrace, when captured.
    pub backtrace: Option<String>,
}

fn live() -> MutexGuard<'static, FxHashMap<usize, LiveContainer>> {
    LIVE.get_or_init(Mutex::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Turns tracking on or off. Containers created while tracking is off are
/// never reported.
pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
}

/// Returns `true` if new containers are being recorded.
#[inline]
#[must_use]
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

pub(crate) fn record(
    header: NonNull<ContainerHeader>,
    kind: ContainerKind,
    type_name: &'static str,
    size: usize,
) {
    if !is_enabled() {
        return;
    }
    let address = header.addr().get();
    let entry = LiveContainer {
        address,
        kind,
        type_name,
        size,
        backtrace: capture_backtrace(),
    };
    live().insert(address, entry);
}

pub(crate) fn forget(header: NonNull<ContainerHeader>) {
    // Entries recorded before tracking was switched off must still go.
    if LIVE.get().is_none() {
        return;
    }
    live().remove(&header.addr().get());
}

/// Returns every tracked container not yet freed, ordered by address.
#[must_use]
pub fn live_containers() -> Vec<LiveContainer> {
    if LIVE.get().is_none() {
        return Vec::new();
    }
    let mut containers: Vec<_> = live().values().cloned().collect();
    containers.sort_by_key(|c| c.address);
    containers
}

/// Logs every tracked container still alive and returns how many there are.
pub fn report_leaks() -> usize {
    let containers = live_containers();
    for container in &containers {
        warn!(
            "live {:?} container {:#x}: {} ({} bytes)",
            container.kind, container.address, container.type_name, container.size
        );
        if let Some(backtrace) = &container.backtrace {
            warn!("allocated at:\n{}", backtrace);
        }
    }
    if !containers.is_empty() {
        warn!("{} container(s) still alive", containers.len());
    }
    containers.len()
}

#[cfg(feature = "fatal-backtrace")]
fn capture_backtrace() -> Option<String> {
    Some(format!("{:?}", backtrace::Backtrace::new()))
}

#[cfg(not(feature = "fatal-backtrace"))]
fn capture_backtrace() -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::ContainerTag;

    // The tracker is global; each test uses its own header addresses and only
    // looks for those.
    fn contains(header: &ContainerHeader) -> bool {
        let address = NonNull::from(header).addr().get();
        live_containers().iter().any(|c| c.address == address)
    }

    #[test]
    fn test_record_and_forget() {
        set_enabled(true);
        let header = ContainerHeader::new(ContainerTag::Normal, ContainerKind::Object);
        let ptr = NonNull::from(&header);

        record(ptr, ContainerKind::Object, "Sample", 40);
        assert!(contains(&header));
        let entry = live_containers()
            .into_iter()
            .find(|c| c.address == ptr.addr().get())
            .unwrap();
        assert_eq!(entry.type_name, "Sample");
        assert_eq!(entry.size, 40);

        forget(ptr);
        assert!(!contains(&header));
    }

    #[test]
    fn test_report_counts_live_entries() {
        set_enabled(true);
        let header = ContainerHeader::new(ContainerTag::Normal, ContainerKind::Arena);
        let ptr = NonNull::from(&header);

        record(ptr, ContainerKind::Arena, "<arena>", 64);
        assert!(report_leaks() >= 1);
        forget(ptr);
    }
}
