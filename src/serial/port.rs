//! Serial port configuration and connection management
//!
//! The platform driver sits behind [`PortOpener`] and [`SerialIo`] so the
//! baud detector and the terminal session can run against a scripted device
//! in tests. Transport errors stop here: they are logged and turned into
//! empty reads or failed writes.

use crate::serial::SerialError;
use colored::Colorize;
use log::{debug, error};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

/// Read/write timeout used for detection and sessions
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Pause after opening a port so the device can finish its own start-up
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(2);

/// Maximum bytes taken from the port per read
pub const READ_BUDGET: usize = 1024;

/// Configuration for serial port connection
#[derive(Debug, Clone)]
pub struct PortConfig {
    /// Serial port path (e.g., /dev/ttyUSB0, COM3)
    pub port_path: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (default: 8)
    pub data_bits: DataBits,
    /// Parity (default: None)
    pub parity: Parity,
    /// Stop bits (default: 1)
    pub stop_bits: StopBits,
    /// Flow control (default: None)
    pub flow_control: FlowControl,
    /// Timeout applied to both reads and writes
    pub timeout: Duration,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            port_path: String::from("/dev/ttyUSB0"),
            baud_rate: 115200,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl PortConfig {
    /// Create a new 8N1 configuration for the given port
    pub fn new(port_path: &str) -> Self {
        Self {
            port_path: port_path.to_string(),
            ..Default::default()
        }
    }

    /// Set the baud rate
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the read/write timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Byte stream to an open serial device.
pub trait SerialIo: Read + Write + Send {
    /// Second handle to the same device, usable from another thread.
    fn try_clone_io(&self) -> io::Result<Box<dyn SerialIo>>;
}

/// Opens serial devices.
pub trait PortOpener: Sync {
    fn open(&self, config: &PortConfig) -> io::Result<Box<dyn SerialIo>>;
}

/// Opens real devices through the platform serial driver.
pub struct SystemPorts;

impl PortOpener for SystemPorts {
    fn open(&self, config: &PortConfig) -> io::Result<Box<dyn SerialIo>> {
        let port = serialport::new(&config.port_path, config.baud_rate)
            .data_bits(config.data_bits)
            .parity(config.parity)
            .stop_bits(config.stop_bits)
            .flow_control(config.flow_control)
            .timeout(config.timeout)
            .open()?;

        Ok(Box::new(NativePort(port)))
    }
}

struct NativePort(Box<dyn SerialPort>);

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl SerialIo for NativePort {
    fn try_clone_io(&self) -> io::Result<Box<dyn SerialIo>> {
        let port = self.0.try_clone()?;
        Ok(Box::new(NativePort(port)))
    }
}

/// Timeouts and interrupted calls mean "nothing arrived", not a failure.
fn is_quiet(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Handle to an open serial port
pub struct SerialConnection {
    io: Box<dyn SerialIo>,
    config: PortConfig,
}

impl SerialConnection {
    /// Open a serial connection with the given configuration
    pub fn open(opener: &dyn PortOpener, config: PortConfig) -> Result<Self, SerialError> {
        debug!(
            "Opening serial port {} at {} bps...",
            config.port_path, config.baud_rate
        );

        let io = opener.open(&config).map_err(|source| SerialError::Open {
            port: config.port_path.clone(),
            baud_rate: config.baud_rate,
            source,
        })?;

        debug!("Port successfully opened.");
        Ok(Self { io, config })
    }

    /// Get the port configuration
    pub fn config(&self) -> &PortConfig {
        &self.config
    }

    /// A single read of at most `max` bytes.
    ///
    /// Returns an empty buffer when the read times out or fails.
    pub fn read_available(&mut self, max: usize) -> Vec<u8> {
        let mut buffer = vec![0u8; max];
        match self.io.read(&mut buffer) {
            Ok(n) => {
                buffer.truncate(n);
                if n > 0 {
                    debug!("Serial read (bytes): {:?}", buffer);
                }
                buffer
            }
            Err(ref e) if is_quiet(e) => Vec::new(),
            Err(e) => {
                error!("{}", SerialError::Read(e));
                Vec::new()
            }
        }
    }

    /// Collect up to `max` bytes, stopping early once `window` has elapsed
    /// or the device goes quiet.
    pub fn read_for(&mut self, max: usize, window: Duration) -> Vec<u8> {
        let deadline = Instant::now() + window;
        let mut data = Vec::with_capacity(max);
        let mut buffer = vec![0u8; max];

        while data.len() < max {
            let remaining = max - data.len();
            match self.io.read(&mut buffer[..remaining]) {
                Ok(0) => break,
                Ok(n) => data.extend_from_slice(&buffer[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(ref e) if is_quiet(e) => break,
                Err(e) => {
                    error!("{}", SerialError::Read(e));
                    break;
                }
            }

            if Instant::now() >= deadline {
                break;
            }
        }

        if !data.is_empty() {
            debug!("Serial read (bytes): {:?}", data);
        }
        data
    }

    /// Write a string and flush. Failures are logged and reported as `false`.
    pub fn write_text(&mut self, text: &str) -> bool {
        debug!("Serial write (str): {:?}", text);

        let result = self
            .io
            .write_all(text.as_bytes())
            .and_then(|_| self.io.flush());

        match result {
            Ok(()) => true,
            Err(e) => {
                error!("{}", SerialError::Write(e));
                false
            }
        }
    }

    /// Second handle on the same port, for writing from another thread
    pub fn try_clone(&self) -> Result<Self, SerialError> {
        let io = self.io.try_clone_io().map_err(|source| SerialError::Clone {
            port: self.config.port_path.clone(),
            source,
        })?;

        Ok(Self {
            io,
            config: self.config.clone(),
        })
    }

    /// Close the port
    pub fn close(self) {
        let port = self.config.port_path;
        debug!("Closing serial port {}...", port);
        drop(self.io);
        debug!("Serial port {} closed.", port);
    }
}

/// Information about a detected serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub path: String,
    pub port_type: PortType,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PortType {
    UsbSerial,
    PciSerial,
    Bluetooth,
    Unknown,
}

impl std::fmt::Display for PortType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortType::UsbSerial => write!(f, "USB Serial"),
            PortType::PciSerial => write!(f, "PCI Serial"),
            PortType::Bluetooth => write!(f, "Bluetooth"),
            PortType::Unknown => write!(f, "Unknown"),
        }
    }
}

impl From<serialport::SerialPortInfo> for PortInfo {
    fn from(p: serialport::SerialPortInfo) -> Self {
        let (port_type, manufacturer, product, vid, pid) = match p.port_type {
            serialport::SerialPortType::UsbPort(info) => (
                PortType::UsbSerial,
                info.manufacturer,
                info.product,
                Some(info.vid),
                Some(info.pid),
            ),
            serialport::SerialPortType::PciPort => (PortType::PciSerial, None, None, None, None),
            serialport::SerialPortType::BluetoothPort => {
                (PortType::Bluetooth, None, None, None, None)
            }
            serialport::SerialPortType::Unknown => (PortType::Unknown, None, None, None, None),
        };

        PortInfo {
            path: p.port_name,
            port_type,
            manufacturer,
            product,
            vid,
            pid,
        }
    }
}

/// List all available serial ports
pub fn list_ports() -> Result<Vec<PortInfo>, SerialError> {
    let ports = serialport::available_ports().map_err(|e| SerialError::Enumerate(e.into()))?;

    Ok(ports.into_iter().map(PortInfo::from).collect())
}

/// Print formatted list of available serial ports
pub fn print_ports() -> Result<(), SerialError> {
    let ports = list_ports()?;

    if ports.is_empty() {
        println!("{}", "No serial ports found".yellow());
        println!("\n{}", "Troubleshooting tips:".cyan().bold());
        println!("  1. Check the device is connected: ls -la /dev/ttyUSB* /dev/ttyACM*");
        println!("  2. Add your user to the 'dialout' group: sudo usermod -aG dialout $USER");
        return Ok(());
    }

    println!("{}", "Available Serial Ports:".green().bold());
    println!("{}", "=".repeat(60));

    for port in ports {
        println!("\n{}: {}", "Port".cyan(), port.path.white().bold());
        println!("  Type: {}", port.port_type);

        if let Some(ref mfg) = port.manufacturer {
            println!("  Manufacturer: {}", mfg);
        }
        if let Some(ref prod) = port.product {
            println!("  Product: {}", prod);
        }
        if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            println!("  VID:PID: {:04x}:{:04x}", vid, pid);
        }
    }

    println!("\n{}", "=".repeat(60));
    println!("{}", "Use: serial-term -p <PORT> [-b <BAUDS>]".yellow());

    Ok(())
}
