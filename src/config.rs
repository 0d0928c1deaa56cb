//! Terminal configuration
//!
//! Command-line options are validated into a [`TermConfig`]. Detection and
//! session tunables default to the built-in constants and can be overridden
//! from an optional TOML file:
//!
//! ```toml
//! log_level = "debug"
//!
//! [detect]
//! bauds = [115200, 9600]
//! settle_ms = 500
//! threshold = 0.8
//!
//! [session]
//! line_ending = "\r\n"
//! ```

use crate::serial::detect::DetectConfig;
use crate::serial::session::SessionConfig;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("detect.bauds must list at least one baud rate")]
    EmptyBaudList,

    #[error("baud rate must be greater than zero")]
    ZeroBaud,

    #[error("detect.threshold must be between 0.0 and 1.0, got {0}")]
    Threshold(f64),

    #[error("{0}.read_budget must be greater than zero")]
    ZeroReadBudget(&'static str),

    #[error("{0}.timeout_ms must be greater than zero")]
    ZeroTimeout(&'static str),
}

/// `[detect]` table
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectSection {
    pub bauds: Option<Vec<u32>>,
    pub probe: Option<String>,
    pub settle_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub read_budget: Option<usize>,
    pub min_len: Option<usize>,
    pub threshold: Option<f64>,
}

/// `[session]` table
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSection {
    pub settle_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub read_budget: Option<usize>,
    pub line_ending: Option<String>,
}

/// Contents of the optional config file; every field may be omitted
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub log_level: Option<String>,
    pub detect: DetectSection,
    pub session: SessionSection,
}

impl FileConfig {
    /// Parse config file contents
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Read and parse a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content).with_context(|| format!("Failed to load {}", path.display()))
    }

    /// Detection settings with file overrides applied
    pub fn detect_config(&self) -> Result<DetectConfig, ConfigError> {
        let section = &self.detect;
        let mut config = DetectConfig::default();

        if let Some(ref bauds) = section.bauds {
            if bauds.is_empty() {
                return Err(ConfigError::EmptyBaudList);
            }
            if bauds.contains(&0) {
                return Err(ConfigError::ZeroBaud);
            }
            config.bauds = bauds.clone();
        }
        if let Some(ref probe) = section.probe {
            config.probe = probe.clone();
        }
        if let Some(ms) = section.settle_ms {
            config.settle = Duration::from_millis(ms);
        }
        if let Some(ms) = section.timeout_ms {
            if ms == 0 {
                return Err(ConfigError::ZeroTimeout("detect"));
            }
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(budget) = section.read_budget {
            if budget == 0 {
                return Err(ConfigError::ZeroReadBudget("detect"));
            }
            config.read_budget = budget;
        }
        if let Some(min_len) = section.min_len {
            config.min_len = min_len;
        }
        if let Some(threshold) = section.threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ConfigError::Threshold(threshold));
            }
            config.threshold = threshold;
        }

        Ok(config)
    }

    /// Session settings with file overrides applied
    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        let section = &self.session;
        let mut config = SessionConfig::default();

        if let Some(ms) = section.settle_ms {
            config.settle = Duration::from_millis(ms);
        }
        if let Some(ms) = section.timeout_ms {
            if ms == 0 {
                return Err(ConfigError::ZeroTimeout("session"));
            }
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(budget) = section.read_budget {
            if budget == 0 {
                return Err(ConfigError::ZeroReadBudget("session"));
            }
            config.read_budget = budget;
        }
        if let Some(ref ending) = section.line_ending {
            config.line_ending = ending.clone();
        }

        Ok(config)
    }
}

/// Everything needed to start the terminal
#[derive(Debug, Clone)]
pub struct TermConfig {
    pub port: String,
    /// `None` means detect
    pub baud_rate: Option<u32>,
    pub log_path: Option<PathBuf>,
    pub detect: DetectConfig,
    pub session: SessionConfig,
}

impl TermConfig {
    pub fn new(
        port: String,
        baud_rate: Option<u32>,
        log_path: Option<PathBuf>,
        file: &FileConfig,
    ) -> Result<Self, ConfigError> {
        if baud_rate == Some(0) {
            return Err(ConfigError::ZeroBaud);
        }

        Ok(Self {
            port,
            baud_rate,
            log_path,
            detect: file.detect_config()?,
            session: file.session_config()?,
        })
    }
}
