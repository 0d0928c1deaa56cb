//! Transport errors
//!
//! These never escape a session: callers log them and fall back to an empty
//! read, a failed write or an absent handle.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SerialError {
    #[error("can't open serial port {port} at {baud_rate} bps: {source}")]
    Open {
        port: String,
        baud_rate: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("serial read failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("serial write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("can't clone serial handle for {port}: {source}")]
    Clone {
        port: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to enumerate serial ports: {0}")]
    Enumerate(#[source] std::io::Error),
}
