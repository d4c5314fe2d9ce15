//! Sensor data acquisition module
//!
//! Byte streams from sensor devices (serial port, replay, simulator) are
//! framed into lines, parsed into readings, and collected in bounded
//! acquisition windows.

pub mod device;
pub mod framer;
pub mod parser;
pub mod replay;
pub mod serial;
pub mod simulated;
pub mod window;

pub use device::{ByteSource, ChunkEvent, DeviceError, DeviceHandle, DeviceTransport, ReadLock};
pub use framer::LineFramer;
pub use parser::{MatchOutcome, ParseReject, ReadingParser};
pub use replay::{ReaderSource, ReplayTransport};
pub use serial::{available_ports, PortInfo, SerialTransport};
pub use simulated::SimulatedTransport;
pub use window::{AcquisitionWindow, WindowEnd, WindowReport};
