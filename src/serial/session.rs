//! Interactive terminal session
//!
//! One thread prints whatever the device sends, another forwards keyboard
//! lines to the device. Both stop once the shared "closed" flag is set by
//! the quit sentinel, end of input, or the Ctrl+C handler. Cancellation is
//! cooperative: a loop notices the flag after its current read times out,
//! so shutdown takes at most one port timeout or one input poll interval.

use crate::serial::capture::{Direction, TrafficLog};
use crate::serial::port::{
    PortConfig, PortOpener, SerialConnection, DEFAULT_SETTLE, DEFAULT_TIMEOUT, READ_BUDGET,
};
use colored::Colorize;
use log::{error, info};
use std::io::{self, BufRead, BufReader, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Typing this line ends the session instead of being sent
pub const QUIT_SENTINEL: &str = "--quit--";

/// How often the writer loop wakes up to check the closed flag
const INPUT_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub settle: Duration,
    pub timeout: Duration,
    pub read_budget: usize,
    /// Appended to every line sent to the device (empty by default)
    pub line_ending: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            settle: DEFAULT_SETTLE,
            timeout: DEFAULT_TIMEOUT,
            read_budget: READ_BUDGET,
            line_ending: String::new(),
        }
    }
}

/// Forward lines from `input` over a channel from a detached thread.
///
/// The channel disconnects at end of input. The thread holds no port
/// resources, so it may be left blocked on the keyboard when the session
/// ends.
pub fn spawn_line_reader<R: BufRead + Send + 'static>(input: R) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        for line in input.lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to read keyboard input: {}", e);
                    break;
                }
            }
        }
    });

    rx
}

/// A single terminal session against one port
pub struct TerminalSession<'a> {
    opener: &'a dyn PortOpener,
    config: SessionConfig,
    closed: Arc<AtomicBool>,
    capture: Option<TrafficLog>,
}

impl<'a> TerminalSession<'a> {
    pub fn new(opener: &'a dyn PortOpener, config: SessionConfig) -> Self {
        Self {
            opener,
            config,
            closed: Arc::new(AtomicBool::new(false)),
            capture: None,
        }
    }

    /// Share the closed flag with an external canceller (Ctrl+C handler)
    pub fn with_cancel(mut self, closed: Arc<AtomicBool>) -> Self {
        self.closed = closed;
        self
    }

    /// Mirror traffic into a log file
    pub fn with_capture(mut self, capture: TrafficLog) -> Self {
        self.capture = Some(capture);
        self
    }

    /// Run against the keyboard and standard output
    pub fn run(&self, port: &str, baud_rate: u32) -> bool {
        let lines = spawn_line_reader(BufReader::new(io::stdin()));
        self.run_with(port, baud_rate, lines, io::stdout())
    }

    /// Run with the given input lines and output sink.
    ///
    /// Returns `false` only when the port could not be set up; however the
    /// session ends afterwards, the port is closed before returning.
    pub fn run_with<W: Write + Send>(
        &self,
        port: &str,
        baud_rate: u32,
        lines: Receiver<String>,
        output: W,
    ) -> bool {
        info!("Opening port {} at {} bauds...", port, baud_rate);

        let config = PortConfig::new(port)
            .with_baud_rate(baud_rate)
            .with_timeout(self.config.timeout);

        let mut conn = match SerialConnection::open(self.opener, config) {
            Ok(conn) => conn,
            Err(e) => {
                error!("{}", e);
                info!("Can't open serial port.");
                return false;
            }
        };

        thread::sleep(self.config.settle);

        let writer = match conn.try_clone() {
            Ok(writer) => writer,
            Err(e) => {
                error!("{}", e);
                conn.close();
                return false;
            }
        };

        let rx_capture = self.capture_handle();
        let tx_capture = self.capture_handle();

        println!(
            "{} Connected to {} at {} baud",
            "[OK]".green().bold(),
            conn.config().port_path.white().bold(),
            conn.config().baud_rate
        );
        println!(
            "{}",
            format!("Type {} or press Ctrl+C to exit\n", QUIT_SENTINEL).yellow()
        );

        let closed: &AtomicBool = &self.closed;
        let read_budget = self.config.read_budget;
        let line_ending = self.config.line_ending.as_str();
        let reader_conn = &mut conn;

        thread::scope(|s| {
            s.spawn(move || read_loop(reader_conn, output, closed, rx_capture, read_budget));
            s.spawn(move || write_loop(writer, lines, closed, tx_capture, line_ending));
        });

        conn.close();
        true
    }

    fn capture_handle(&self) -> Option<TrafficLog> {
        let capture = self.capture.as_ref()?;
        match capture.try_clone() {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("{:#}", e);
                None
            }
        }
    }
}

/// Decodes a byte stream chunk by chunk.
///
/// A multibyte character split across two reads is held back until its
/// remaining bytes arrive; anything else that is not UTF-8 becomes U+FFFD.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    pending: Vec<u8>,
}

impl StreamDecoder {
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let complete = self.pending.len() - incomplete_tail(&self.pending);
        let text = String::from_utf8_lossy(&self.pending[..complete]).into_owned();
        self.pending.drain(..complete);
        text
    }

    /// Whatever is still held back, decoded as-is
    pub fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

/// Length of a truncated UTF-8 sequence at the end of `bytes`, if any.
fn incomplete_tail(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for start in (len.saturating_sub(3)..len).rev() {
        // Skip continuation bytes until the lead byte of the last sequence
        if bytes[start] & 0xc0 == 0x80 {
            continue;
        }
        return match std::str::from_utf8(&bytes[start..]) {
            Err(e) if e.valid_up_to() == 0 && e.error_len().is_none() => len - start,
            _ => 0,
        };
    }
    0
}

fn read_loop<W: Write>(
    conn: &mut SerialConnection,
    mut output: W,
    closed: &AtomicBool,
    mut capture: Option<TrafficLog>,
    read_budget: usize,
) {
    let mut decoder = StreamDecoder::default();

    while !closed.load(Ordering::SeqCst) {
        let data = conn.read_available(read_budget);
        if data.is_empty() {
            continue;
        }
        emit(&decoder.decode(&data), &mut output, &mut capture);
    }

    emit(&decoder.finish(), &mut output, &mut capture);
}

fn emit<W: Write>(text: &str, output: &mut W, capture: &mut Option<TrafficLog>) {
    if text.is_empty() {
        return;
    }

    if let Err(e) = output
        .write_all(text.as_bytes())
        .and_then(|_| output.flush())
    {
        error!("Failed to write to output: {}", e);
    }

    if let Some(ref mut log) = capture {
        log.record(Direction::Rx, text);
    }
}

fn write_loop(
    mut conn: SerialConnection,
    lines: Receiver<String>,
    closed: &AtomicBool,
    mut capture: Option<TrafficLog>,
    line_ending: &str,
) {
    while !closed.load(Ordering::SeqCst) {
        let line = match lines.recv_timeout(INPUT_POLL) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                info!("End of input, closing terminal.");
                closed.store(true, Ordering::SeqCst);
                break;
            }
        };

        if line == QUIT_SENTINEL {
            closed.store(true, Ordering::SeqCst);
            break;
        }

        let outgoing = format!("{}{}", line, line_ending);
        conn.write_text(&outgoing);

        if let Some(ref mut log) = capture {
            log.record(Direction::Tx, &outgoing);
        }
    }
}
