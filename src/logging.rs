//! Diagnostic output
//!
//! Log records go to stdout as `2024-01-31_17:02:11 - [INFO] message` with a
//! UTC timestamp. Blank messages are printed as-is so they work as spacers,
//! and leading line breaks are emitted before the prefix.

use chrono::{NaiveDateTime, Utc};
use log::Level;
use std::io::Write;

/// Level used when neither `RUST_LOG` nor the config file sets one
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

fn level_name(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARNING",
        Level::Info => "INFO",
        Level::Debug | Level::Trace => "DEBUG",
    }
}

pub fn format_line(timestamp: NaiveDateTime, level: Level, message: &str) -> String {
    if message.trim().is_empty() {
        return message.to_string();
    }

    // Leading line breaks stay bare lines above the prefixed text
    let body = message.trim_start_matches('\n');
    let breaks = &message[..message.len() - body.len()];

    format!(
        "{}{} - [{}] {}",
        breaks,
        timestamp.format(TIMESTAMP_FORMAT),
        level_name(level),
        body
    )
}

/// Install the global logger. `RUST_LOG` takes precedence over `level`.
pub fn init(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Stdout)
        .format(|buf, record| {
            let message = record.args().to_string();
            writeln!(
                buf,
                "{}",
                format_line(Utc::now().naive_utc(), record.level(), &message)
            )
        })
        .init();
}
