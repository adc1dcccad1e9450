//! Tracing setup for processes embedding the cache.
//!
//! The `[logging]` section picks the startup level unless `RUST_LOG` is set.
//! The level can be changed afterwards with [`apply_logging_level`] without
//! reinstalling the subscriber.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

use crate::config::{CacherConfig, LOG_LEVELS};

type LevelHandle = reload::Handle<EnvFilter, Registry>;

static LEVEL: OnceLock<LevelHandle> = OnceLock::new();

fn filter_for(level: &str) -> Result<EnvFilter, String> {
    let level = level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        return Err(format!("unknown log level '{level}', expected one of {LOG_LEVELS:?}"));
    }
    EnvFilter::try_new(&level).map_err(|e| format!("invalid log filter '{level}': {e}"))
}

/// Installs the global subscriber at `config.logging.level`.
///
/// Returns `false` if a global subscriber was already in place.
pub fn init_from_config(config: &CacherConfig) -> bool {
    init_tracing(&config.logging.level)
}

pub fn init_tracing(level: &str) -> bool {
    if LEVEL.get().is_some() {
        return false;
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| filter_for(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter_layer, handle) = reload::Layer::new(filter);

    let installed = tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer())
        .try_init()
        .is_ok();
    if installed {
        let _ = LEVEL.set(handle);
        tracing::debug!(level = %level, "tracing initialized");
    }
    installed
}

/// Replaces the active filter with `level`.
pub fn apply_logging_level(level: &str) -> Result<(), String> {
    let filter = filter_for(level)?;
    let handle = LEVEL
        .get()
        .ok_or_else(|| "tracing was not initialized by cacher".to_string())?;
    handle
        .reload(filter)
        .map_err(|e| format!("failed to reload log filter: {e}"))
}

/// The filter currently in effect, if tracing was initialized here.
pub fn current_filter() -> Option<String> {
    LEVEL.get()?.with_current(|f| f.to_string()).ok()
}
