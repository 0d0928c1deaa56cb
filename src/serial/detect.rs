//! Baud rate auto-detection
//!
//! Brute-force scan over a list of common baud rates. Each candidate is
//! opened, sent a probe string, and the reply is scored by how much of it
//! looks like human-readable text. A device that does not answer with
//! printable text at the right rate is simply not found.

use crate::serial::port::{
    PortConfig, PortOpener, SerialConnection, DEFAULT_SETTLE, DEFAULT_TIMEOUT, READ_BUDGET,
};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Candidate rates in trial order. The first one that passes wins.
pub const COMMON_BAUD_RATES: &[u32] = &[
    115200, 19200, 9600, 1200, 2400, 4800, 50, 75, 110, 134, 150, 200, 300, 600, 1800, 38400,
    57600, 230400, 460800, 500000, 576000, 921600,
];

/// Line terminators around a token that is unlikely to appear by accident
pub const PROBE: &str = "\r\na2sf6h8q9\r\n";

/// Replies shorter than this (after stripping line terminators) prove nothing
pub const MIN_RESPONSE_LEN: usize = 5;

/// Minimum share of ASCII letters and digits in a reply
pub const TEXT_THRESHOLD: f64 = 0.70;

/// Tunables for the detection heuristic
#[derive(Debug, Clone, PartialEq)]
pub struct DetectConfig {
    pub bauds: Vec<u32>,
    pub probe: String,
    pub settle: Duration,
    pub timeout: Duration,
    pub read_budget: usize,
    pub min_len: usize,
    pub threshold: f64,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            bauds: COMMON_BAUD_RATES.to_vec(),
            probe: PROBE.to_string(),
            settle: DEFAULT_SETTLE,
            timeout: DEFAULT_TIMEOUT,
            read_budget: READ_BUDGET,
            min_len: MIN_RESPONSE_LEN,
            threshold: TEXT_THRESHOLD,
        }
    }
}

/// How a probe reply was judged
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// Nothing came back
    Silent,
    /// Too short to judge
    Inconclusive { len: usize },
    /// Not enough text-like characters
    Rejected { ratio: f64 },
    Accepted { ratio: f64 },
}

/// Score a reply. `\r` and `\n` are ignored before counting.
pub fn score_response(response: &str, min_len: usize, threshold: f64) -> Verdict {
    if response.is_empty() {
        return Verdict::Silent;
    }

    let stripped: Vec<char> = response
        .chars()
        .filter(|c| *c != '\r' && *c != '\n')
        .collect();

    if stripped.len() < min_len {
        return Verdict::Inconclusive {
            len: stripped.len(),
        };
    }

    let human = stripped.iter().filter(|c| c.is_ascii_alphanumeric()).count();
    let ratio = human as f64 / stripped.len() as f64;

    if ratio >= threshold {
        Verdict::Accepted { ratio }
    } else {
        Verdict::Rejected { ratio }
    }
}

/// What one candidate rate produced
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub baud_rate: u32,
    pub response: String,
}

/// Tries each configured rate until one answers with text
pub struct BaudDetector<'a> {
    opener: &'a dyn PortOpener,
    config: DetectConfig,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> BaudDetector<'a> {
    pub fn new(opener: &'a dyn PortOpener, config: DetectConfig) -> Self {
        Self {
            opener,
            config,
            cancel: None,
        }
    }

    /// Stop between candidates once `flag` is set
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// First rate whose reply passes the text heuristic, if any
    pub fn detect(&self, port: &str) -> Option<u32> {
        for &baud_rate in &self.config.bauds {
            if self.cancelled() {
                warn!("Baud rate detection interrupted.");
                return None;
            }

            info!("Checking {} bauds...", baud_rate);
            let Some(outcome) = self.probe(port, baud_rate) else {
                continue;
            };

            let rate = outcome.baud_rate;
            match score_response(&outcome.response, self.config.min_len, self.config.threshold) {
                Verdict::Accepted { ratio } => {
                    info!("Seems that baud rate is {} ({:.0}% text).", rate, ratio * 100.0);
                    return Some(rate);
                }
                Verdict::Silent => debug!("No response at {} bauds.", rate),
                Verdict::Inconclusive { len } => {
                    debug!("Response at {} bauds too short ({} chars).", rate, len)
                }
                Verdict::Rejected { ratio } => {
                    debug!("Response at {} bauds is {:.0}% text.", rate, ratio * 100.0)
                }
            }
        }

        None
    }

    /// Open at `baud_rate`, send the probe and collect the reply.
    ///
    /// `None` when the port could not be opened. The port is always closed
    /// before returning.
    pub fn probe(&self, port: &str, baud_rate: u32) -> Option<ProbeOutcome> {
        let config = PortConfig::new(port)
            .with_baud_rate(baud_rate)
            .with_timeout(self.config.timeout);

        let mut conn = match SerialConnection::open(self.opener, config) {
            Ok(conn) => conn,
            Err(e) => {
                error!("{}", e);
                return None;
            }
        };

        thread::sleep(self.config.settle);

        conn.write_text(&self.config.probe);
        let reply = conn.read_for(self.config.read_budget, self.config.timeout);
        conn.close();

        Some(ProbeOutcome {
            baud_rate,
            response: String::from_utf8_lossy(&reply).into_owned(),
        })
    }
}
