//! Tracing subscriber setup
//!
//! Library code only emits `tracing` events. Binaries and build tools that
//! embed the cache call `init` once; an already installed global subscriber
//! is left in place.

use crate::config::schema::GeneralConfig;
use tracing::Subscriber;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// `verbosity`: 0 = warn, 1 = info, 2+ = debug. `[general] verbose` counts as
/// at least 1. `RUST_LOG` overrides both. Returns `false` when another
/// subscriber was already installed.
pub fn init(config: &GeneralConfig, verbosity: u8) -> bool {
    let verbosity = if config.verbose { verbosity.max(1) } else { verbosity };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_for(verbosity));
    subscriber(config, filter).try_init().is_ok()
}

/// Build the fmt subscriber for `config` without installing it
pub fn subscriber(config: &GeneralConfig, filter: EnvFilter) -> Box<dyn Subscriber + Send + Sync> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if config.log_format == "json" {
        Box::new(builder.json().finish())
    } else {
        Box::new(builder.finish())
    }
}

fn filter_for(verbosity: u8) -> EnvFilter {
    match verbosity {
        0 => EnvFilter::new("buildcache=warn"),
        1 => EnvFilter::new("buildcache=info"),
        _ => EnvFilter::new("buildcache=debug"),
    }
}
