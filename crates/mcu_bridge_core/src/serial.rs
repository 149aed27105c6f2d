use std::collections::VecDeque;
use std::io::{Read, Write};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::Serialize;
use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use tokio::sync::{Mutex, Notify};
use tokio::time::{timeout_at, Instant};

use crate::{BridgeError, Result};

/// Poll interval of the blocking reader thread; also bounds how long a
/// close() takes to be observed by the thread.
const READER_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParityMode {
    None,
    Even,
    Odd,
}

impl FromStr for ParityMode {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(ParityMode::None),
            "even" => Ok(ParityMode::Even),
            "odd" => Ok(ParityMode::Odd),
            other => Err(BridgeError::invalid_argument(format!(
                "unknown parity '{other}' (expected none, even, or odd)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowMode {
    None,
    Software,
    Hardware,
}

impl FromStr for FlowMode {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(FlowMode::None),
            "software" | "xonxoff" => Ok(FlowMode::Software),
            "hardware" | "rtscts" => Ok(FlowMode::Hardware),
            other => Err(BridgeError::invalid_argument(format!(
                "unknown flow control '{other}' (expected none, software, or hardware)"
            ))),
        }
    }
}

/// Line configuration of a serial session.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: ParityMode,
    pub flow: FlowMode,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            data_bits: 8,
            stop_bits: 1,
            parity: ParityMode::None,
            flow: FlowMode::None,
        }
    }
}

impl SerialConfig {
    fn data_bits(&self) -> Result<DataBits> {
        match self.data_bits {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(BridgeError::invalid_argument(format!(
                "unsupported data bits {other} (expected 5-8)"
            ))),
        }
    }

    fn stop_bits(&self) -> Result<StopBits> {
        match self.stop_bits {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            other => Err(BridgeError::invalid_argument(format!(
                "unsupported stop bits {other} (expected 1 or 2)"
            ))),
        }
    }

    fn parity(&self) -> Parity {
        match self.parity {
            ParityMode::None => Parity::None,
            ParityMode::Even => Parity::Even,
            ParityMode::Odd => Parity::Odd,
        }
    }

    fn flow_control(&self) -> FlowControl {
        match self.flow {
            FlowMode::None => FlowControl::None,
            FlowMode::Software => FlowControl::Software,
            FlowMode::Hardware => FlowControl::Hardware,
        }
    }
}

/// One enumerated serial port.
#[derive(Debug, Clone, Serialize)]
pub struct PortDescriptor {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<u16>,
}

/// Receive side shared between the reader thread and async consumers.
struct RxShared {
    buf: StdMutex<VecDeque<u8>>,
    notify: Notify,
    alive: AtomicBool,
    high_water: usize,
    dropped: AtomicU64,
}

impl RxShared {
    fn new(high_water: usize) -> Self {
        Self {
            buf: StdMutex::new(VecDeque::new()),
            notify: Notify::new(),
            alive: AtomicBool::new(true),
            high_water,
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, bytes: &[u8]) {
        let mut buf = self.buf.lock().expect("rx buffer lock poisoned");
        buf.extend(bytes.iter().copied());
        let mut dropped = 0u64;
        while buf.len() > self.high_water {
            buf.pop_front();
            dropped += 1;
        }
        drop(buf);
        if dropped > 0 {
            let total = self.dropped.fetch_add(dropped, Ordering::Relaxed) + dropped;
            tracing::warn!(dropped, total, "serial receive buffer overflow, oldest bytes dropped");
        }
        self.notify.notify_waiters();
    }

    /// FIFO prefix removal; returns an empty vec when the buffer is empty.
    fn drain(&self, max_bytes: usize) -> Vec<u8> {
        let mut buf = self.buf.lock().expect("rx buffer lock poisoned");
        let take = buf.len().min(max_bytes);
        buf.drain(..take).collect()
    }

    fn mark_dead(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

struct OpenPort {
    name: String,
    // Shared with in-flight blocking writes, so close never waits on a
    // stalled drain.
    writer: Arc<StdMutex<Box<dyn SerialPort>>>,
    shared: Arc<RxShared>,
}

/// Process-wide owner of the single serial session.
pub struct SerialManager {
    inner: Mutex<Option<OpenPort>>,
}

impl SerialManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Enumerate available ports. Read-only; never touches the session.
    pub fn list(&self) -> Result<Vec<PortDescriptor>> {
        let ports = serialport::available_ports()?;
        Ok(ports
            .into_iter()
            .map(|info| {
                let mut descriptor = PortDescriptor {
                    path: info.port_name,
                    manufacturer: None,
                    serial_number: None,
                    product: None,
                    vendor_id: None,
                    product_id: None,
                };
                if let SerialPortType::UsbPort(usb) = info.port_type {
                    descriptor.manufacturer = usb.manufacturer;
                    descriptor.serial_number = usb.serial_number;
                    descriptor.product = usb.product;
                    descriptor.vendor_id = Some(usb.vid);
                    descriptor.product_id = Some(usb.pid);
                }
                descriptor
            })
            .collect())
    }

    /// Open the session. Fails with `AlreadyOpen` when a live session exists;
    /// a session whose channel died is cleared and reopened.
    pub async fn open(&self, name: &str, config: &SerialConfig, high_water: usize) -> Result<()> {
        let mut guard = self.inner.lock().await;

        if let Some(open) = guard.as_ref() {
            if open.shared.is_alive() {
                return Err(BridgeError::AlreadyOpen(open.name.clone()));
            }
            tracing::info!(port = %open.name, "clearing dead serial session");
            *guard = None;
        }

        let builder = serialport::new(name, config.baud_rate)
            .data_bits(config.data_bits()?)
            .stop_bits(config.stop_bits()?)
            .parity(config.parity())
            .flow_control(config.flow_control())
            .timeout(READER_POLL);

        // The OS open can block on some drivers; keep it off the executor.
        let writer = tokio::task::spawn_blocking(move || builder.open())
            .await
            .map_err(join_error)?
            .map_err(|e| classify_open_error(name, e))?;
        let reader = writer.try_clone().map_err(BridgeError::Serial)?;

        let shared = Arc::new(RxShared::new(high_water));
        let thread_shared = shared.clone();
        let thread_name = name.to_string();
        std::thread::Builder::new()
            .name("serial-rx".to_string())
            .spawn(move || rx_loop(reader, thread_shared, thread_name))?;

        tracing::info!(port = name, baud = config.baud_rate, "serial port opened");
        *guard = Some(OpenPort {
            name: name.to_string(),
            writer: Arc::new(StdMutex::new(writer)),
            shared,
        });
        Ok(())
    }

    /// Write bytes and wait for the transmit buffer to drain. Guarantees the
    /// bytes left the local buffer, not that the remote end received them.
    ///
    /// The drain can stall under hardware flow control, so it runs on a
    /// blocking thread with the session mutex released.
    pub async fn write(&self, bytes: &[u8]) -> Result<usize> {
        let writer = {
            let mut guard = self.inner.lock().await;
            ensure_open(&mut guard)?.writer.clone()
        };

        let bytes = bytes.to_vec();
        let written = bytes.len();
        tokio::task::spawn_blocking(move || {
            let mut port = writer.lock().expect("serial writer lock poisoned");
            port.write_all(&bytes)?;
            port.flush()?;
            Ok::<_, std::io::Error>(())
        })
        .await
        .map_err(join_error)?
        .map_err(BridgeError::Io)?;
        Ok(written)
    }

    /// Consume up to `max_bytes` from the receive buffer.
    ///
    /// A non-empty buffer returns immediately. An empty buffer suspends
    /// until data arrives or `wait` elapses; expiry returns empty and is
    /// not an error.
    pub async fn read(&self, max_bytes: usize, wait: Duration) -> Result<Vec<u8>> {
        let shared = {
            let mut guard = self.inner.lock().await;
            ensure_open(&mut guard)?.shared.clone()
        };
        if max_bytes == 0 {
            return Ok(Vec::new());
        }

        let deadline = Instant::now() + wait;
        loop {
            // Register before checking the buffer so a push between the
            // check and the await cannot be missed.
            let notified = shared.notify.notified();

            let bytes = shared.drain(max_bytes);
            if !bytes.is_empty() {
                return Ok(bytes);
            }
            if !shared.is_alive() || wait.is_zero() || Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            if timeout_at(deadline, notified).await.is_err() {
                return Ok(shared.drain(max_bytes));
            }
        }
    }

    /// Idempotent close; always resets to the destroyed lifecycle point.
    pub async fn close(&self) -> Result<bool> {
        let mut guard = self.inner.lock().await;
        match guard.take() {
            Some(open) => {
                open.shared.mark_dead();
                tracing::info!(port = %open.name, "serial port closed");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Name of the currently open port, if any.
    pub async fn current_port(&self) -> Option<String> {
        let guard = self.inner.lock().await;
        guard
            .as_ref()
            .filter(|open| open.shared.is_alive())
            .map(|open| open.name.clone())
    }
}

impl Default for SerialManager {
    fn default() -> Self {
        Self::new()
    }
}

fn join_error(e: tokio::task::JoinError) -> BridgeError {
    BridgeError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
}

/// Liveness check run at the head of every session operation. A session
/// whose channel died asynchronously is torn down here and reported as
/// `NotOpen`.
fn ensure_open(guard: &mut Option<OpenPort>) -> Result<&mut OpenPort> {
    if let Some(open) = guard.as_ref() {
        if !open.shared.is_alive() {
            tracing::warn!(port = %open.name, "serial channel closed unexpectedly");
            *guard = None;
        }
    }
    guard.as_mut().ok_or(BridgeError::NotOpen)
}

/// Blocking reader: appends arriving bytes to the shared buffer until the
/// session is closed or the channel errors out. Channel errors are logged
/// and swallowed; they surface on the next operation via the liveness check.
fn rx_loop(mut port: Box<dyn SerialPort>, shared: Arc<RxShared>, name: String) {
    let mut chunk = [0u8; 512];
    while shared.is_alive() {
        match port.read(&mut chunk) {
            Ok(0) => {
                tracing::warn!(port = %name, "serial channel reported EOF");
                break;
            }
            Ok(n) => shared.push(&chunk[..n]),
            Err(e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::Interrupted =>
            {
                continue;
            }
            Err(e) => {
                tracing::warn!(port = %name, error = %e, "serial channel error");
                break;
            }
        }
    }
    shared.mark_dead();
}

/// Best-effort classification of an open failure. The underlying error text
/// varies by platform, so the fallbacks pattern-match the description.
fn classify_open_error(name: &str, err: serialport::Error) -> BridgeError {
    match err.kind() {
        serialport::ErrorKind::NoDevice => return BridgeError::PortNotFound(name.to_string()),
        serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
            return BridgeError::PortNotFound(name.to_string())
        }
        serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            return BridgeError::AccessDenied(name.to_string())
        }
        _ => {}
    }

    let description = err.to_string().to_ascii_lowercase();
    if description.contains("permission") || description.contains("access") {
        BridgeError::AccessDenied(name.to_string())
    } else if description.contains("no such") || description.contains("not found") {
        BridgeError::PortNotFound(name.to_string())
    } else {
        BridgeError::Serial(err)
    }
}
