//! Logging configuration for the lifetime analysis engine
//!
//! Wiring for the `log` facade backed by `env_logger`, scoped for a
//! library that runs embedded in larger hosts: the verbosity knob here
//! opens up only this crate's targets, so turning on per-statement
//! transfer tracing does not flip a host's other dependencies to trace.
//!
//! # Log levels
//!
//! - `warn!` - recoverable oddities (duplicate definitions at intake)
//! - `info!` - translation-unit level progress
//! - `debug!` - per-function analysis and driver decisions
//! - `trace!` - per-statement transfer detail and constraint generation
//!
//! # Environment variables
//!
//! `ANALYSIS_LOG` takes precedence over `RUST_LOG`, so an embedding host
//! can keep its own `RUST_LOG` conventions while tuning the engine
//! separately. Both use comma-separated `target=level` directives:
//!
//! ```bash
//! ANALYSIS_LOG=analysis::engine::driver=debug my-host file.cc
//! ANALYSIS_LOG=analysis::engine::transfer=trace my-host file.cc
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

use env_logger::Builder;
use log::LevelFilter;

static INIT: Once = Once::new();
static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize logging with sensible defaults (Warn level).
///
/// This only initializes once; subsequent calls are no-ops.
pub fn init() {
    init_with_level(LevelFilter::Warn);
}

/// Open this crate's targets up to `level`; everything else stays at
/// Warn.
///
/// Raising the engine's verbosity must not change what an embedding
/// host's other dependencies log, so the level is translated into a
/// crate-scoped directive rather than applied globally.
pub fn init_with_level(level: LevelFilter) {
    init_with_filter(&crate_scoped_directives(level));
}

/// Initialize from `ANALYSIS_LOG`, falling back to `RUST_LOG`, then to
/// Warn when neither is set.
pub fn init_from_env() {
    init_with_filter(&env_directives());
}

/// Initialize from an explicit directive string
/// (`"warn,analysis::engine::transfer=trace"` style).
pub fn init_with_filter(spec: &str) {
    INIT.call_once(|| {
        Builder::new()
            .parse_filters(spec)
            .format(|buf, record| {
                // Inside the engine's own output the crate name on every
                // line is noise; keep the subsystem path.
                let target = record.target();
                let target = target.strip_prefix("analysis::").unwrap_or(target);
                writeln!(
                    buf,
                    "[{:5}] {}: {}",
                    record.level(),
                    target,
                    record.args()
                )
            })
            .init();
        INITIALIZED.store(true, Ordering::Release);
    });
}

/// Initialize logging for tests; safe to call from every test, and
/// tolerant of a logger already installed by the harness.
pub fn init_test() {
    // A failed try_init means a logger is already installed, which is
    // just as initialized for the caller's purposes.
    let _ = Builder::new()
        .parse_filters(&env_directives())
        .is_test(true)
        .try_init();
    INITIALIZED.store(true, Ordering::Release);
}

/// Whether any of the `init*` functions has installed a logger.
pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::Acquire)
}

/// `level` for this crate's targets, Warn for everything else
fn crate_scoped_directives(level: LevelFilter) -> String {
    let directive = match level {
        LevelFilter::Off => "off",
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Info => "info",
        LevelFilter::Debug => "debug",
        LevelFilter::Trace => "trace",
    };
    format!("warn,analysis={}", directive)
}

/// `ANALYSIS_LOG`, then `RUST_LOG`, then plain Warn
fn env_directives() -> String {
    std::env::var("ANALYSIS_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "warn".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::{debug, error, info, trace, warn};

    #[test]
    fn verbosity_knob_is_scoped_to_this_crate() {
        assert_eq!(
            crate_scoped_directives(LevelFilter::Trace),
            "warn,analysis=trace"
        );
        assert_eq!(
            crate_scoped_directives(LevelFilter::Debug),
            "warn,analysis=debug"
        );
        assert_eq!(
            crate_scoped_directives(LevelFilter::Off),
            "warn,analysis=off"
        );
    }

    #[test]
    fn macros_route_through_the_initialized_logger() {
        init_test();
        // One call per level the engine logs at; this verifies the
        // facade stays wired, not the rendered output.
        error!("constraint set exceeded its size guard");
        warn!("duplicate definition re-listed at intake");
        info!("analyzing translation unit with 2 definitions");
        debug!("analyzing 'target'");
        trace!("weak update at bb2");
    }

    #[test]
    fn init_test_is_idempotent_and_marks_initialization() {
        init_test();
        init_test();
        assert!(is_initialized());
    }
}
