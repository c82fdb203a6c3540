// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! slog backend.
//!
//! Records from the `log` facade reach slog through the `slog_stdlog` bridge
//! installed by [`init_with_config`](super::init_with_config).

use slog::{Drain, Logger, o};
use slog_async::Async;
use slog_json::Json;
use slog_term::{FullFormat, TermDecorator};
use std::io;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable terminal output
    Terminal,
    /// One JSON object per line on stdout
    Json,
}

/// slog logger configuration
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Output format
    pub format: LogFormat,
    /// Minimum level
    pub level: slog::Level,
    /// Key-value pairs attached to every record
    pub static_fields: Vec<(String, String)>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Terminal,
            level: slog::Level::Info,
            static_fields: Vec::new(),
        }
    }
}

/// Build a logger for `config`.
pub fn create_logger(config: &LoggerConfig) -> Logger {
    let logger = match config.format {
        LogFormat::Terminal => {
            let decorator = TermDecorator::new().build();
            let drain = FullFormat::new(decorator).build().fuse();
            let drain = drain.filter_level(config.level).fuse();
            Logger::root(Async::new(drain).build().fuse(), o!())
        }
        LogFormat::Json => {
            let drain = Json::new(io::stdout()).add_default_keys().build().fuse();
            let drain = drain.filter_level(config.level).fuse();
            Logger::root(Async::new(drain).build().fuse(), o!())
        }
    };

    with_static_fields(logger, &config.static_fields)
}

fn with_static_fields(mut logger: Logger, fields: &[(String, String)]) -> Logger {
    for (key, value) in fields {
        // slog keys are 'static; the logger lives for the whole process
        let key: &'static str = Box::leak(key.clone().into_boxed_str());
        logger = logger.new(o!(key => value.clone()));
    }
    logger
}

/// Keeps the global slog logger installed while alive.
pub struct LoggerGuard {
    _guard: slog_scope::GlobalLoggerGuard,
}

/// Install `config`'s logger as the global slog logger.
pub fn init_global_logger(config: &LoggerConfig) -> LoggerGuard {
    let guard = slog_scope::set_global_logger(create_logger(config));
    LoggerGuard { _guard: guard }
}
