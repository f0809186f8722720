//! Tracing setup shared by embedders and the test suite.
//!
//! Poseidon itself never installs a global subscriber implicitly; the host
//! application decides where spans and events go. This module only offers a
//! convenience initializer for binaries and tests that don't want to wire up
//! `tracing-subscriber` by hand.

use tracing_subscriber::EnvFilter;

/// Installs a `tracing-subscriber` fmt layer driven by `RUST_LOG` (defaulting to
/// `info`). Safe to call more than once; later calls are no-ops.
pub fn init_default() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
