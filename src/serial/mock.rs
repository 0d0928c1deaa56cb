//! Scripted serial device for tests

use crate::serial::port::{PortConfig, PortOpener, SerialIo};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

type Responder = Box<dyn FnMut(u32, &[u8]) -> Vec<u8> + Send>;

struct DeviceState {
    responder: Responder,
    refuse_open: Vec<u32>,
    refuse_all: bool,
    failing_writes: bool,
    chunk_size: usize,
    rx: VecDeque<u8>,
    written: Vec<u8>,
    opened_bauds: Vec<u32>,
    open_handles: usize,
    overlapping_opens: usize,
    closes: usize,
}

/// In-memory device. Every open creates a handle; clones of a handle count
/// as extra handles and the device records a close when the last one drops.
#[derive(Clone)]
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl MockDevice {
    fn with_responder(responder: Responder) -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState {
                responder,
                refuse_open: Vec::new(),
                refuse_all: false,
                failing_writes: false,
                chunk_size: usize::MAX,
                rx: VecDeque::new(),
                written: Vec::new(),
                opened_bauds: Vec::new(),
                open_handles: 0,
                overlapping_opens: 0,
                closes: 0,
            })),
        }
    }

    /// Never answers
    pub fn silent() -> Self {
        Self::with_responder(Box::new(|_, _| Vec::new()))
    }

    /// Echoes writes at `baud`; at any other rate the reply is line noise
    pub fn echo_at(baud: u32) -> Self {
        Self::with_responder(Box::new(move |rate, data| {
            if rate == baud {
                data.to_vec()
            } else {
                data.iter().map(|b| b ^ 0xa5).collect()
            }
        }))
    }

    /// Answers every write with `reply`, whatever the rate
    pub fn replying(reply: &str) -> Self {
        let reply = reply.as_bytes().to_vec();
        Self::with_responder(Box::new(move |_, _| reply.clone()))
    }

    /// Every open fails
    pub fn unavailable() -> Self {
        let device = Self::silent();
        device.lock().refuse_all = true;
        device
    }

    /// Opening at `baud` fails
    pub fn refusing(self, baud: u32) -> Self {
        self.lock().refuse_open.push(baud);
        self
    }

    pub fn with_chunk_size(self, chunk_size: usize) -> Self {
        self.lock().chunk_size = chunk_size;
        self
    }

    pub fn with_failing_writes(self) -> Self {
        self.lock().failing_writes = true;
        self
    }

    /// Queue bytes as if the device had sent them
    pub fn push_rx(&self, data: &[u8]) {
        self.lock().rx.extend(data.iter().copied());
    }

    pub fn written(&self) -> Vec<u8> {
        self.lock().written.clone()
    }

    pub fn opened_bauds(&self) -> Vec<u32> {
        self.lock().opened_bauds.clone()
    }

    pub fn open_handles(&self) -> usize {
        self.lock().open_handles
    }

    /// Opens that happened while another handle was still alive
    pub fn overlapping_opens(&self) -> usize {
        self.lock().overlapping_opens
    }

    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap()
    }
}

impl PortOpener for MockDevice {
    fn open(&self, config: &PortConfig) -> io::Result<Box<dyn SerialIo>> {
        let mut state = self.lock();
        if state.refuse_all || state.refuse_open.contains(&config.baud_rate) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "No such file or directory",
            ));
        }

        if state.open_handles > 0 {
            state.overlapping_opens += 1;
        }
        state.opened_bauds.push(config.baud_rate);
        state.open_handles += 1;

        Ok(Box::new(MockHandle {
            state: Arc::clone(&self.state),
            baud_rate: config.baud_rate,
        }))
    }
}

struct MockHandle {
    state: Arc<Mutex<DeviceState>>,
    baud_rate: u32,
}

impl Read for MockHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        {
            let mut state = self.state.lock().unwrap();
            if !state.rx.is_empty() {
                let n = buf.len().min(state.rx.len()).min(state.chunk_size);
                for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
        }

        // Short stand-in for the driver's read timeout
        thread::sleep(Duration::from_millis(5));
        Err(io::Error::new(io::ErrorKind::TimedOut, "Operation timed out"))
    }
}

impl Write for MockHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        if state.failing_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }

        state.written.extend_from_slice(buf);
        let reply = (state.responder)(self.baud_rate, buf);
        state.rx.extend(reply);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialIo for MockHandle {
    fn try_clone_io(&self) -> io::Result<Box<dyn SerialIo>> {
        self.state.lock().unwrap().open_handles += 1;
        Ok(Box::new(MockHandle {
            state: Arc::clone(&self.state),
            baud_rate: self.baud_rate,
        }))
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.open_handles -= 1;
            if state.open_handles == 0 {
                state.closes += 1;
            }
        }
    }
}

/// `Write` target that tests can inspect while a session is running
#[derive(Clone, Default)]
pub struct SharedOutput(Arc<Mutex<Vec<u8>>>);

impl SharedOutput {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
