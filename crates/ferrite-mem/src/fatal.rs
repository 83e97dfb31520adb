//! Fatal invariant violations.
//!
//! Some misuse cannot be reported as an [`Error`](crate::Error) because the
//! process is already in a state where continuing would corrupt memory: an
//! arena torn down while something still references it leaves dangling
//! back-offsets in every object that escaped. These paths log at `error`
//! level, print a backtrace when the `fatal-backtrace` feature is enabled,
//! and abort. They never unwind.

use ferrite_log::error;
use std::fmt;

/// Reports a fatal condition and aborts the process.
#[cold]
#[inline(never)]
pub fn fatal_error(args: fmt::Arguments<'_>) -> ! {
    error!("fatal: {}", args);
    print_backtrace();
    std::process::abort()
}

#[cfg(feature = "fatal-backtrace")]
fn print_backtrace() {
    eprintln!("{:?}", backtrace::Backtrace::new());
}

#[cfg(not(feature = "fatal-backtrace"))]
fn print_backtrace() {}

/// Aborts through [`fatal_error`] when `cond` does not hold.
///
/// Unlike `assert!`, the check stays in release builds and never unwinds.
#[macro_export]
macro_rules! runtime_assert {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::fatal::fatal_error(format_args!($($arg)+));
        }
    };
}
