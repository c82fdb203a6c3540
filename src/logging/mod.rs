// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Logging setup.
//!
//! The crate logs through the `log` facade, mostly via the context-tagged
//! macros in [`wrapper`].  A host application that already installs a logger
//! needs nothing from this module; otherwise [`init`] installs `env_logger`
//! and [`init_with_config`] picks `env_logger` or the slog backend from a
//! [`LoggingConfig`].  Only the first initialization in a process takes
//! effect.

pub mod config;
pub mod structured;
pub mod wrapper;

#[cfg(test)]
pub mod test_logger;


use log::{info, LevelFilter};
use once_cell::sync::OnceCell;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};

use self::config::LoggingConfig;
use self::structured::LoggerGuard;

static INIT: Once = Once::new();
static STRUCTURED_GUARD: OnceCell<LoggerGuard> = OnceCell::new();
static USING_STRUCTURED: AtomicBool = AtomicBool::new(false);

/// Returns true once the slog backend has been installed.
pub fn is_structured_logging() -> bool {
    USING_STRUCTURED.load(Ordering::SeqCst)
}

/// Install `env_logger` at `level` (default `info`); `RUST_LOG` wins if set.
pub fn init(level: Option<LevelFilter>) {
    INIT.call_once(|| init_env_logger(level.unwrap_or(LevelFilter::Info)));
}

/// Install the backend selected by `config`.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        if config.structured {
            init_structured(config);
        } else {
            init_env_logger(config.level_filter());
        }
    });
}

fn init_env_logger(level: LevelFilter) {
    let env = env_logger::Env::default().filter_or("RUST_LOG", level_name(level));

    // A host may have installed its own logger already
    let installed = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .format_target(true)
        .try_init();

    if installed.is_ok() {
        info!("Logging initialized at level: {}", log::max_level());
    }
}

fn init_structured(config: &LoggingConfig) {
    let guard = structured::init_global_logger(&config.to_logger_config());
    let _ = STRUCTURED_GUARD.set(guard);
    USING_STRUCTURED.store(true, Ordering::SeqCst);

    let Some(level) = config.level_filter().to_level() else {
        log::set_max_level(LevelFilter::Off);
        return;
    };

    if slog_stdlog::init_with_level(level).is_ok() {
        info!("Structured logging initialized at level: {} (format {})", level, config.format);
    }
}

fn level_name(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::Trace => "trace",
        LevelFilter::Debug => "debug",
        LevelFilter::Info => "info",
        LevelFilter::Warn => "warn",
        LevelFilter::Error => "error",
        LevelFilter::Off => "off",
    }
}
