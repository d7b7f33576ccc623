//! Host side of the sensor node serial protocol.
//!
//! The peer is a microcontroller with a handful of water quality sensors
//! (EC, turbidity, pH, ...) that answers newline-terminated text requests
//! on a serial port. There are no sequence numbers and no framing beyond
//! the line ending; the only markers are the `Data#` payload prefix, the
//! `CALIB` busy token and the `newdatareceived` acknowledgment.
//!
//! The crate is split the same way the protocol is:
//!
//! * [`nom_parser`] decodes the three `Data#` payload shapes,
//! * [`command`] encodes request and commit lines,
//! * [`session`] is the sans-io negotiation state machine for the
//!   CONFIG and CALIB modes,
//! * [`master`] drives a [`Transport`] through a session, with the
//!   retry driver and the commit loop,
//! * [`node`] is a model of the peer, used for testing and simulation.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "serial")]
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use sensorlink_proto::master::{Master, Timing};
//! use sensorlink_proto::transport::serial::open_port;
//! use sensorlink_proto::wake::NoWake;
//!
//! let port = open_port("/dev/ttyUSB0", sensorlink_proto::DEFAULT_BAUD_RATE)?;
//! let mut master = Master::new(port, NoWake, Timing::default());
//! let readings = master.request_readings(chrono::Local::now().time())?;
//! let record = readings.record();
//! println!("{:?}", record.fields());
//! # Ok(()) }
//! # #[cfg(not(feature = "serial"))]
//! # fn main() {}
//! ```

#![warn(missing_debug_implementations)]

mod buffer;
pub mod command;
mod error;
pub mod master;
pub mod node;
pub mod nom_parser;
pub mod session;
pub mod transport;
pub mod types;
pub mod wake;

pub use error::{Error, ValidationError};
pub use master::{Master, Timing};
pub use nom_parser::MalformedPayload;
pub use session::{Decision, Mode, Operator, Outcome};
pub use transport::{Clock, SystemClock, Transport};
pub use types::{
    CalibrationParameter, CalibrationSensor, Readings, Record, RecordSink, SensorConfig,
    SensorReading,
};
pub use wake::WakeSignal;

/// Baud rate used by the peer firmware.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Prefix of every payload line sent by the peer.
pub const DATA_MARKER: &str = "Data#";

/// Line sent by the peer while it is busy calibrating.
pub const BUSY_TOKEN: &str = "CALIB";

/// Line sent by the peer once it has stored a commit payload.
pub const ACK_TOKEN: &str = "newdatareceived";

/// Handshake line the host sends after receiving an initial payload.
pub const RECEIVED_LINE: &str = "received";
