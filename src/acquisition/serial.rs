//! Serial port transport backed by the `serialport` crate.
//!
//! `serialport` is blocking, so every open and read runs on Tokio's blocking
//! pool. Reads use a short timeout which surfaces as [`ChunkEvent::Idle`],
//! handing control back to the acquisition window several times a second
//! even when the sensor is silent.

use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serialport::{SerialPort, SerialPortType};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::device::{ByteSource, ChunkEvent, DeviceError, DeviceTransport};
use crate::config::{FlowControl, Parity, SerialSettings};

/// A serial port as reported by the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub usb: bool,
    /// `USB 2341:0043 Arduino LLC Arduino Uno`, `PCI`, `Bluetooth`, ...
    pub description: String,
}

/// List serial ports, USB adapters first.
pub fn available_ports() -> Result<Vec<PortInfo>, DeviceError> {
    let ports = serialport::available_ports().map_err(|e| DeviceError::Open {
        port: "<enumerate>".to_string(),
        message: e.to_string(),
    })?;

    let mut infos: Vec<PortInfo> = ports
        .into_iter()
        .map(|p| {
            let (usb, description) = match p.port_type {
                SerialPortType::UsbPort(usb) => {
                    let mut desc = format!("USB {:04x}:{:04x}", usb.vid, usb.pid);
                    for part in [usb.manufacturer, usb.product].into_iter().flatten() {
                        desc.push(' ');
                        desc.push_str(&part);
                    }
                    (true, desc)
                }
                SerialPortType::PciPort => (false, "PCI".to_string()),
                SerialPortType::BluetoothPort => (false, "Bluetooth".to_string()),
                SerialPortType::Unknown => (false, "unknown".to_string()),
            };
            PortInfo { name: p.port_name, usb, description }
        })
        .collect();

    infos.sort_by(|a, b| b.usb.cmp(&a.usb).then_with(|| a.name.cmp(&b.name)));
    Ok(infos)
}

/// Opens real serial hardware.
pub struct SerialTransport {
    chunk_size: usize,
}

impl SerialTransport {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// The configured port, or the first USB serial port when none is set.
    fn resolve_port(settings: &SerialSettings) -> Result<String, DeviceError> {
        if !settings.port.trim().is_empty() {
            return Ok(settings.port.trim().to_string());
        }
        let ports = available_ports()?;
        match ports.into_iter().find(|p| p.usb) {
            Some(p) => {
                info!(port = %p.name, device = %p.description, "Auto-selected USB serial port");
                Ok(p.name)
            }
            None => Err(DeviceError::NotFound("no USB serial port found".to_string())),
        }
    }
}

#[async_trait]
impl DeviceTransport for SerialTransport {
    async fn open(&self, settings: &SerialSettings) -> Result<Box<dyn ByteSource>, DeviceError> {
        let settings = settings.clone();
        let baud = settings.baud_rate;
        let chunk_size = self.chunk_size;

        let (port_name, port) = tokio::task::spawn_blocking(move || {
            let port_name = Self::resolve_port(&settings)?;
            let mut port = serialport::new(&port_name, settings.baud_rate)
                .data_bits(data_bits(settings.data_bits))
                .stop_bits(if settings.stop_bits == 2 {
                    serialport::StopBits::Two
                } else {
                    serialport::StopBits::One
                })
                .parity(match settings.parity {
                    Parity::None => serialport::Parity::None,
                    Parity::Odd => serialport::Parity::Odd,
                    Parity::Even => serialport::Parity::Even,
                })
                .flow_control(match settings.flow_control {
                    FlowControl::None => serialport::FlowControl::None,
                    FlowControl::Software => serialport::FlowControl::Software,
                    FlowControl::Hardware => serialport::FlowControl::Hardware,
                })
                .timeout(Duration::from_millis(settings.read_timeout_ms.max(1)))
                .open()
                .map_err(|e| open_error(&port_name, &e))?;

            // Drop whatever the board printed before we attached
            if let Err(e) = port.clear(serialport::ClearBuffer::Input) {
                debug!(port = %port_name, error = %e, "Could not clear input buffer");
            }
            Ok::<(String, Box<dyn SerialPort>), DeviceError>((port_name, port))
        })
        .await
        .map_err(|e| DeviceError::Io(io::Error::other(e)))??;

        info!(port = %port_name, baud, "Serial port opened");
        Ok(Box::new(SerialSource::new(port, port_name, chunk_size)))
    }

    fn name(&self) -> &str {
        "serial"
    }
}

fn data_bits(bits: u8) -> serialport::DataBits {
    match bits {
        5 => serialport::DataBits::Five,
        6 => serialport::DataBits::Six,
        7 => serialport::DataBits::Seven,
        _ => serialport::DataBits::Eight,
    }
}

fn open_error(port: &str, err: &serialport::Error) -> DeviceError {
    match err.kind() {
        serialport::ErrorKind::NoDevice => DeviceError::NotFound(port.to_string()),
        serialport::ErrorKind::Io(kind) => DeviceError::from_open_io(port, &io::Error::new(kind, err.description.clone())),
        _ => DeviceError::Open {
            port: port.to_string(),
            message: err.to_string(),
        },
    }
}

/// Blocking read running on the blocking pool.
type PendingRead = JoinHandle<io::Result<Vec<u8>>>;

/// An open serial port.
///
/// Generic over the port so the read path can be driven by any blocking
/// reader; the transport always uses `Box<dyn SerialPort>`.
struct SerialSource<P> {
    /// `None` once closed
    port: Option<Arc<Mutex<P>>>,
    port_name: String,
    chunk_size: usize,
    /// Read abandoned by a dropped `read_chunk`; its bytes belong to the next call
    pending: Option<PendingRead>,
}

impl<P: Read + Send + 'static> SerialSource<P> {
    fn new(port: P, port_name: String, chunk_size: usize) -> Self {
        Self {
            port: Some(Arc::new(Mutex::new(port))),
            port_name,
            chunk_size: chunk_size.max(1),
            pending: None,
        }
    }

    fn spawn_read(port: Arc<Mutex<P>>, chunk_size: usize) -> PendingRead {
        tokio::task::spawn_blocking(move || {
            let mut port = port.blocking_lock();
            let mut buf = vec![0u8; chunk_size];
            port.read(&mut buf).map(|n| {
                buf.truncate(n);
                buf
            })
        })
    }
}

#[async_trait]
impl<P: Read + Send + 'static> ByteSource for SerialSource<P> {
    async fn read_chunk(&mut self) -> io::Result<ChunkEvent> {
        let read = match self.pending.take() {
            Some(read) => read,
            None => {
                let Some(port) = self.port.as_ref() else {
                    return Ok(ChunkEvent::Eof);
                };
                Self::spawn_read(Arc::clone(port), self.chunk_size)
            }
        };

        // Parked before awaiting so a cancelled call leaves it for the next one
        let read = self.pending.insert(read);
        let joined = read.await;
        self.pending = None;
        let result = joined.map_err(io::Error::other)?;

        match result {
            // Poll reported readable but nothing came: the device hung up
            Ok(buf) if buf.is_empty() => Ok(ChunkEvent::Eof),
            Ok(buf) => Ok(ChunkEvent::Data(buf)),
            Err(e) => match e.kind() {
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => {
                    Ok(ChunkEvent::Idle)
                }
                io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof | io::ErrorKind::NotConnected => {
                    warn!(port = %self.port_name, error = %e, "Serial device disconnected");
                    Ok(ChunkEvent::Eof)
                }
                _ => Err(e),
            },
        }
    }

    fn release(&mut self) {
        debug!(port = %self.port_name, "Serial read lock released");
    }

    async fn close(&mut self) {
        self.pending = None;
        if self.port.take().is_some() {
            info!(port = %self.port_name, "Serial port closed");
        }
    }
}
