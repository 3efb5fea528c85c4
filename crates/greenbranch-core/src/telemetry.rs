//! Tracing setup for greenbranch binaries.
//!
//! [`init_tracing`] installs an `EnvFilter` (honouring `RUST_LOG`) and a
//! pretty or newline-delimited JSON fmt layer. Only the first call in a
//! process takes effect.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. `level` applies when `RUST_LOG` is unset.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    // Logs go to stderr so stdout stays free for result JSON and event frames.
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init()
            .ok();
    }
}

/// Map a verbosity name (`"debug"`, `"WARN"`, ...) to a level, defaulting to `INFO`.
pub fn parse_level(name: &str) -> Level {
    name.trim().parse().unwrap_or(Level::INFO)
}
