//! Serial Terminal
//!
//! Interactive terminal for a single serial port.
//!
//! # Features
//!
//! - **Terminal session**: device output is printed as it arrives, typed lines
//!   are sent to the device. Type `--quit--` or press Ctrl+C to leave.
//! - **Baud rate detection**: when no rate is given, common rates are probed
//!   until the device answers with readable text
//! - **Traffic log**: received and transmitted data appended to a file
//!
//! # Usage
//!
//! ```bash
//! # List available serial ports
//! serial-term --list
//!
//! # Open a terminal at a known baud rate
//! serial-term -p /dev/ttyUSB0 -b 115200
//!
//! # Detect the baud rate, log all traffic
//! serial-term -p /dev/ttyUSB0 -l logs/session.log
//! ```

mod config;
mod logging;
mod serial;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use colored::Colorize;
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use config::{FileConfig, TermConfig};
use serial::{BaudDetector, SystemPorts, TerminalSession, TrafficLog};

/// Exit code when the session could not open the port
const EXIT_FAILURE: i32 = 1;

/// Serial Terminal
///
/// Interactive terminal for a single serial port
#[derive(Parser)]
#[command(name = "serial-term")]
#[command(author = "Prasanna Gautam")]
#[command(version)]
#[command(about = "Interactive serial port terminal with baud rate auto-detection")]
#[command(disable_version_flag = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0, COM3)
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate (detected automatically when omitted)
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    bauds: Option<u32>,

    /// Append all received and transmitted data to this file
    #[arg(short, long)]
    log: Option<PathBuf>,

    /// TOML file with detection and session settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List available serial ports and exit
    #[arg(long)]
    list: bool,

    /// Print version
    #[arg(short = 'v', long, action = clap::ArgAction::Version)]
    version: Option<bool>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let file_config = match cli.config {
        Some(ref path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };

    logging::init(
        file_config
            .log_level
            .as_deref()
            .unwrap_or(logging::DEFAULT_LOG_LEVEL),
    );

    if cli.list {
        serial::port::print_ports()?;
        return Ok(());
    }

    let Some(port) = cli.port else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let config = TermConfig::new(port, cli.bauds, cli.log, &file_config)?;

    // Ctrl+C cancels detection and closes the session through the same flag
    let closed = Arc::new(AtomicBool::new(false));
    ctrlc_handler(Arc::clone(&closed))?;

    let opener = SystemPorts;

    let baud_rate = match config.baud_rate {
        Some(baud_rate) => baud_rate,
        None => {
            info!("Baud rate not provided, detecting...");
            let detector = BaudDetector::new(&opener, config.detect.clone())
                .with_cancel(Arc::clone(&closed));

            match detector.detect(&config.port) {
                Some(baud_rate) => {
                    println!(
                        "{} Detected baud rate: {}",
                        "[OK]".green().bold(),
                        baud_rate.to_string().white().bold()
                    );
                    baud_rate
                }
                None => {
                    warn!("Baud rate detection failed.");
                    return Ok(());
                }
            }
        }
    };

    let mut session = TerminalSession::new(&opener, config.session.clone()).with_cancel(closed);

    if let Some(ref path) = config.log_path {
        match TrafficLog::open(path) {
            Ok(log) => {
                println!(
                    "{} Logging to: {}",
                    "[LOG]".cyan().bold(),
                    path.display().to_string().white()
                );
                session = session.with_capture(log);
            }
            Err(e) => error!("{:#}", e),
        }
    }

    if !session.run(&config.port, baud_rate) {
        debug!("Program exit ({}).", EXIT_FAILURE);
        std::process::exit(EXIT_FAILURE);
    }

    debug!("Program exit (0).");
    Ok(())
}

/// Setup Ctrl+C signal handler
fn ctrlc_handler(closed: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        println!("\n{}", "Closing terminal...".yellow());
        closed.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")
}
