//! Serial port terminal
//!
//! This module provides:
//! - A thin connection wrapper over the platform serial driver
//! - Baud rate auto-detection
//! - The interactive read/write session and its traffic log

pub mod capture;
pub mod detect;
pub mod error;
#[cfg(test)]
pub mod mock;
pub mod port;
pub mod session;

pub use capture::TrafficLog;
pub use detect::BaudDetector;
pub use error::SerialError;
pub use port::SystemPorts;
pub use session::TerminalSession;
