//! Console logging for the `workhost` binary.
//!
//! Library code only emits `tracing` events. Installing a subscriber is left
//! to the binary, which calls [`init_tracing`] once at startup.
//!
//! The filter comes from `RUST_LOG` when it is set, for example:
//!
//! ```bash
//! RUST_LOG=workhost=trace,workhost::link=off cargo run
//! ```
//!
//! Otherwise every target is filtered at the configured [`LogLevel`], the
//! same level the dispatcher hands to its workers.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use workhost_core::types::LogLevel;

/// Installs the global `fmt` subscriber.
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(level: LogLevel) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| level.as_str().into());

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true),
        )
        .try_init()?;

    Ok(())
}
