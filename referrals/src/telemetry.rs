//! Tracing subscriber setup for the binaries

use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static INIT: Once = Once::new();

/// Install the global subscriber, logging to stderr.
///
/// Reads per-target levels from `REFERRALS_LOG`, e.g.
/// `REFERRALS_LOG=referrals::solver=debug,trials=warn`, and falls back to
/// `referrals=info,trials=info` when unset or invalid. Safe to call repeatedly.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("REFERRALS_LOG")
            .unwrap_or_else(|_| EnvFilter::new("referrals=info,trials=info"));

        let _ = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .with(filter)
            .try_init();
    });
}
