//! Peer side of the link: the sensor controller as seen from the wire.
//!
//! [`Node`] is sans-io. Feed it the bytes or lines received from the host,
//! and write back whatever replies it returns.
//!
//! # Example
//!
//! ```
//! use sensorlink_proto::node::Node;
//! use sensorlink_proto::types::SensorConfig;
//!
//! let mut node = Node::new(
//!     25.0,
//!     vec![],
//!     vec![
//!         SensorConfig::new("EC", true)?,
//!         SensorConfig::new("Tbd", false)?,
//!     ],
//!     vec![],
//! );
//! assert_eq!(node.receive_data(b"config\n"), ["Data#EC1;Tbd0;"]);
//! assert_eq!(node.receive_data(b"newconfig:1;1;\n"), ["newdatareceived"]);
//! assert!(node.config()[1].enabled());
//! # Ok::<(), sensorlink_proto::types::Error>(())
//! ```

use chrono::NaiveTime;

use crate::buffer::LineBuffer;
use crate::command::{encode_calibration_payload, encode_config_payload, encode_readings_payload};
use crate::nom_parser::node::parse_command;
use crate::types::{
    CalibrationParameter, CalibrationSensor, Readings, SensorConfig, SensorReading,
};
use crate::{ACK_TOKEN, BUSY_TOKEN};

// Longest host line; a calibration commit for a full table fits easily.
const MAX_LINE_LEN: usize = 1024;

/// A line sent by the host, decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Reading request carrying the host's wall clock time.
    Time(NaiveTime),
    Config,
    ManualCalib,
    /// Handshake after an initial payload.
    Received,
    NewConfig(Vec<bool>),
    NewCalibData(Vec<Vec<f64>>),
    CancelConfig,
    CancelCalib,
}

impl Command {
    /// Decode one host line, `None` if it isn't a known command.
    pub fn parse(line: &str) -> Option<Self> {
        parse_command(line)
    }
}

/// Simulated sensor controller.
#[derive(Debug, Clone)]
pub struct Node {
    temperature: f64,
    readings: Vec<SensorReading>,
    config: Vec<SensorConfig>,
    calibration: Vec<CalibrationSensor>,
    busy: usize,
    buffer: LineBuffer,
}

impl Node {
    pub fn new(
        temperature: f64,
        readings: Vec<SensorReading>,
        config: Vec<SensorConfig>,
        calibration: Vec<CalibrationSensor>,
    ) -> Self {
        Self {
            temperature,
            readings,
            config,
            calibration,
            busy: 0,
            buffer: LineBuffer::new(),
        }
    }

    /// Answer the next `lines` host lines with the busy token, as the
    /// controller does while a calibration routine runs.
    pub fn set_busy(&mut self, lines: usize) {
        self.busy = lines;
    }

    pub fn set_readings(&mut self, temperature: f64, readings: Vec<SensorReading>) {
        self.temperature = temperature;
        self.readings = readings;
    }

    pub fn config(&self) -> &[SensorConfig] {
        &self.config
    }

    pub fn calibration(&self) -> &[CalibrationSensor] {
        &self.calibration
    }

    /// Feed raw bytes from the link. Returns the replies to every line
    /// completed by `data`.
    pub fn receive_data(&mut self, data: &[u8]) -> Vec<String> {
        self.buffer.write(data);
        let mut replies = Vec::new();
        while let Some(line) = self.buffer.next_line() {
            replies.extend(self.handle_line(&line));
        }
        if self.buffer.len() > MAX_LINE_LEN {
            log::warn!("Dropping {} bytes without a line end", self.buffer.len());
            self.buffer.clear();
        }
        replies
    }

    /// Handle one host line, returning the reply if there is one.
    pub fn handle_line(&mut self, line: &str) -> Option<String> {
        if line.trim().is_empty() {
            return None;
        }
        if self.busy > 0 {
            self.busy -= 1;
            return Some(BUSY_TOKEN.to_owned());
        }
        let Some(command) = Command::parse(line) else {
            log::debug!("Unknown command {:?}", line);
            return None;
        };
        log::trace!("Command {:?}", command);
        match command {
            Command::Time(time) => {
                let readings = Readings::new(
                    &time.format("%H:%M").to_string(),
                    self.temperature,
                    self.readings.clone(),
                );
                Some(encode_readings_payload(&readings))
            }
            Command::Config => Some(encode_config_payload(&self.config)),
            Command::ManualCalib => Some(encode_calibration_payload(&self.calibration)),
            Command::Received | Command::CancelConfig | Command::CancelCalib => None,
            Command::NewConfig(flags) => self.apply_config(&flags).then(ack),
            Command::NewCalibData(groups) => self.apply_calibration(&groups).then(ack),
        }
    }

    fn apply_config(&mut self, flags: &[bool]) -> bool {
        if flags.len() != self.config.len() {
            log::warn!(
                "Config for {} sensors, {} expected",
                flags.len(),
                self.config.len()
            );
            return false;
        }
        for (sensor, enabled) in self.config.iter_mut().zip(flags) {
            sensor.set_enabled(*enabled);
        }
        true
    }

    fn apply_calibration(&mut self, groups: &[Vec<f64>]) -> bool {
        let shape_ok = groups.len() == self.calibration.len()
            && self
                .calibration
                .iter()
                .zip(groups)
                .all(|(sensor, values)| sensor.parameters().len() == values.len());
        if !shape_ok {
            log::warn!("Calibration data doesn't match the parameter table");
            return false;
        }
        let mut updated = self.calibration.clone();
        for (sensor, values) in updated.iter_mut().zip(groups) {
            for (param, value) in sensor.parameters_mut().iter_mut().zip(values) {
                if param.set_value(*value).is_err() {
                    return false;
                }
            }
        }
        self.calibration = updated;
        true
    }
}

fn ack() -> String {
    ACK_TOKEN.to_owned()
}

impl Default for Node {
    /// The four sensor board: EC, turbidity, pH and ammonia.
    fn default() -> Self {
        let reading = |name: &str, value: f64, unit: &str| SensorReading::new(name, value, unit);
        let config = |name: &str, enabled: bool| SensorConfig::new(name, enabled);
        let param = |name: &str, value: f64| CalibrationParameter::new(name, value);
        let build = || -> Result<Self, crate::types::Error> {
            Ok(Self::new(
                25.0,
                vec![
                    reading("EC", 2.0, "mS/cm")?,
                    reading("Tbd", 10.5, "NTU")?,
                    reading("PH", 7.01, "")?,
                    reading("NH3N", 0.25, "mg/L")?,
                ],
                vec![
                    config("EC", true)?,
                    config("Tbd", true)?,
                    config("PH", true)?,
                    config("NH3N", false)?,
                ],
                vec![
                    CalibrationSensor::new(
                        "EC",
                        [
                            param("K Value Low (1.413 mS/cm)", 1.0)?,
                            param("K Value High (2.76 mS/cm or 12.88 mS/cm)", 1.0)?,
                        ],
                    )?,
                    CalibrationSensor::new(
                        "Tbd",
                        [
                            param("Opaque (2000 NTU) Voltage", 2317.0)?,
                            param("Translucent (1000 NTU) Voltage", 2574.0)?,
                            param("Transparent (0 NTU) Voltage", 2772.0)?,
                        ],
                    )?,
                    CalibrationSensor::new(
                        "PH",
                        [
                            param("Neutral (PH 7) Voltage", 1500.0)?,
                            param("Acid (PH 4) Voltage", 1150.0)?,
                        ],
                    )?,
                ],
            ))
        };
        // the names above are all valid
        build().unwrap_or_else(|_| Self::new(25.0, vec![], vec![], vec![]))
    }
}
