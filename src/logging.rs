//! Logging and tracing configuration for evidence-walk
//!
//! Library code logs through the `tracing` macros; the binary installs a
//! subscriber once at startup with [`init`] or [`init_verbose`].
//!
//! # Environment Variable Control
//!
//! Set `RUST_LOG` to control log levels at runtime:
//! ```bash
//! RUST_LOG=debug evidence-walk list image.E01 out.csv
//! RUST_LOG=evidence_walk::walker=trace evidence-walk find image.dd SAM
//! RUST_LOG=forensic_audit=info evidence-walk extract image.dd evtx out/
//! ```
//!
//! Chain-of-custody events are emitted on the `forensic_audit` target, see
//! [`crate::common::audit`].

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Default filter: info in release, debug in debug builds or with the
/// `debug-logging` feature.
fn default_filter() -> EnvFilter {
    if cfg!(any(debug_assertions, feature = "debug-logging")) {
        EnvFilter::new("evidence_walk=debug,forensic_audit=info")
    } else {
        EnvFilter::new("evidence_walk=info,forensic_audit=info")
    }
}

/// Initialize the logging/tracing system
///
/// Call this once at application startup (in main.rs). Output goes to
/// stderr so stdout stays clean for listings and JSON.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter());

    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact(),
    );

    // Ignore error if a subscriber is already set
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Initialize logging with verbose output (file:line, thread IDs)
pub fn init_verbose() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trace"));

    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .pretty(),
    );

    let _ = tracing::subscriber::set_global_default(subscriber);
}
