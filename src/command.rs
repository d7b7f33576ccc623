//! Line encoders for both directions of the link.
//!
//! [`Request`] covers everything the host sends. The `encode_*_payload`
//! functions build the peer's `Data#` answers, they are the inverse of the
//! decoders in [`nom_parser`](crate::nom_parser).

use std::fmt::{self, Write};

use chrono::{NaiveTime, Timelike};

use crate::types::{CalibrationSensor, Readings, SensorConfig};
use crate::{DATA_MARKER, RECEIVED_LINE};

pub(crate) const CONFIG_REQUEST: &str = "config";
pub(crate) const CALIB_REQUEST: &str = "manualcalib";
pub(crate) const NEW_CONFIG_PREFIX: &str = "newconfig:";
pub(crate) const NEW_CALIB_PREFIX: &str = "newcalibdata:";
pub(crate) const CANCEL_CONFIG_PREFIX: &str = "cancelconfig:";
pub(crate) const CANCEL_CALIB_PREFIX: &str = "cancelcalib:";

/// A line sent from the host to the peer.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Reading request, carries the host's wall clock time as `HH:MM`.
    Readings(NaiveTime),
    /// Ask for the sensor enable list.
    Config,
    /// Ask for the calibration table.
    Calibration,
    /// Handshake sent after an initial payload was received.
    Received,
    /// Commit new enable flags, in the order the peer listed its sensors.
    NewConfig(Vec<bool>),
    /// Commit new calibration values, one group per sensor.
    NewCalibration(Vec<Vec<f64>>),
    CancelConfig,
    CancelCalibration,
}

impl Request {
    /// Build the commit request for an edited enable list.
    pub fn new_config(config: &[SensorConfig]) -> Self {
        Self::NewConfig(config.iter().map(SensorConfig::enabled).collect())
    }

    /// Build the commit request for an edited calibration table.
    pub fn new_calibration(sensors: &[CalibrationSensor]) -> Self {
        Self::NewCalibration(
            sensors
                .iter()
                .map(|s| s.parameters().iter().map(|p| p.value()).collect())
                .collect(),
        )
    }

    /// The request as sent on the wire, without the line terminator.
    pub fn to_line(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Readings(time) => write!(f, "{:02}:{:02}", time.hour(), time.minute()),
            Self::Config => f.write_str(CONFIG_REQUEST),
            Self::Calibration => f.write_str(CALIB_REQUEST),
            Self::Received => f.write_str(RECEIVED_LINE),
            Self::NewConfig(flags) => {
                f.write_str(NEW_CONFIG_PREFIX)?;
                for flag in flags {
                    write!(f, "{};", u8::from(*flag))?;
                }
                Ok(())
            }
            Self::NewCalibration(groups) => {
                f.write_str(NEW_CALIB_PREFIX)?;
                for values in groups {
                    for value in values {
                        write!(f, "{},", value)?;
                    }
                    f.write_char(';')?;
                }
                Ok(())
            }
            Self::CancelConfig => f.write_str(CANCEL_CONFIG_PREFIX),
            Self::CancelCalibration => f.write_str(CANCEL_CALIB_PREFIX),
        }
    }
}

/// `Data#Time:<t> ;Temperature:<v> ;<Name>:<v> <unit>;...`
///
/// The derived TSS reading is host side only and is left out.
pub fn encode_readings_payload(readings: &Readings) -> String {
    let mut line = String::from(DATA_MARKER);
    let _ = write!(
        line,
        "Time:{} ;Temperature:{} ;",
        readings.read_time(),
        readings.temperature_text()
    );
    for sensor in readings
        .sensors()
        .iter()
        .filter(|s| s.name() != crate::types::TSS_FIELD)
    {
        let _ = write!(line, "{}:{} {};", sensor.name(), sensor.text(), sensor.unit());
    }
    line
}

/// `Data#<Name><0|1>;...`
pub fn encode_config_payload(config: &[SensorConfig]) -> String {
    let mut line = String::from(DATA_MARKER);
    for sensor in config {
        let _ = write!(line, "{}{};", sensor.name(), u8::from(sensor.enabled()));
    }
    line
}

/// `Data#<Name>:<label>_<value>,...;...`
pub fn encode_calibration_payload(sensors: &[CalibrationSensor]) -> String {
    let mut line = String::from(DATA_MARKER);
    for sensor in sensors {
        let _ = write!(line, "{}:", sensor.name());
        for param in sensor.parameters() {
            let _ = write!(line, "{}_{},", param.name(), param.value());
        }
        line.push(';');
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nom_parser::{self, node::parse_command};
    use crate::node::Command;
    use crate::types::{CalibrationParameter, SensorReading};

    fn config() -> Vec<SensorConfig> {
        vec![
            SensorConfig::new("EC", true).unwrap(),
            SensorConfig::new("Tbd", false).unwrap(),
        ]
    }

    fn calibration() -> Vec<CalibrationSensor> {
        vec![
            CalibrationSensor::new(
                "PH",
                vec![
                    CalibrationParameter::new("Neutral (PH 7) Voltage", 1500.0).unwrap(),
                    CalibrationParameter::new("Acid (PH 4) Voltage", 2032.44).unwrap(),
                ],
            )
            .unwrap(),
            CalibrationSensor::new("NH3N", vec![]).unwrap(),
            CalibrationSensor::new(
                "EC",
                vec![CalibrationParameter::new("K Value Low (1.413 mS/cm)", 0.985).unwrap()],
            )
            .unwrap(),
        ]
    }

    #[test]
    fn test_requests() {
        let time = NaiveTime::from_hms_opt(7, 5, 59).unwrap();
        assert_eq!(Request::Readings(time).to_line(), "07:05");
        assert_eq!(Request::Config.to_line(), "config");
        assert_eq!(Request::Calibration.to_line(), "manualcalib");
        assert_eq!(Request::Received.to_line(), "received");
        assert_eq!(Request::CancelConfig.to_line(), "cancelconfig:");
        assert_eq!(Request::CancelCalibration.to_line(), "cancelcalib:");
    }

    #[test]
    fn test_new_config() {
        let mut config = config();
        assert_eq!(Request::new_config(&config).to_line(), "newconfig:1;0;");
        config[1].toggle();
        assert_eq!(Request::new_config(&config).to_line(), "newconfig:1;1;");
    }

    #[test]
    fn test_new_calibration() {
        assert_eq!(
            Request::new_calibration(&calibration()).to_line(),
            "newcalibdata:1500,2032.44,;;0.985,;"
        );
    }

    #[test]
    fn test_config_commit_round_trip() {
        let config = config();
        let line = Request::new_config(&config).to_line();
        let flags = match parse_command(&line) {
            Some(Command::NewConfig(flags)) => flags,
            other => panic!("unexpected {:?}", other),
        };
        let decoded: Vec<_> = config
            .iter()
            .zip(flags)
            .map(|(c, enabled)| SensorConfig::new(c.name(), enabled).unwrap())
            .collect();
        assert_eq!(decoded, config);
    }

    #[test]
    fn test_calibration_commit_round_trip() {
        let sensors = calibration();
        let line = Request::new_calibration(&sensors).to_line();
        let groups = match parse_command(&line) {
            Some(Command::NewCalibData(groups)) => groups,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(groups.len(), sensors.len());
        for (sensor, values) in sensors.iter().zip(groups) {
            let expected: Vec<f64> = sensor.parameters().iter().map(|p| p.value()).collect();
            assert_eq!(values, expected);
        }
    }

    #[test]
    fn test_payload_round_trip() {
        let config = config();
        assert_eq!(encode_config_payload(&config), "Data#EC1;Tbd0;");
        assert_eq!(
            nom_parser::parse_config(&encode_config_payload(&config)).unwrap(),
            config
        );

        let sensors = calibration();
        assert_eq!(
            nom_parser::parse_calibration(&encode_calibration_payload(&sensors)).unwrap(),
            sensors
        );

        let readings = Readings::new(
            "12:30",
            25.0,
            vec![
                SensorReading::new("EC", 2.0, "mS/cm").unwrap(),
                SensorReading::new("PH", 7.0, "").unwrap(),
            ],
        );
        let line = encode_readings_payload(&readings);
        assert_eq!(
            line,
            "Data#Time:12:30 ;Temperature:25.00 ;EC:2.00 mS/cm;PH:7.00 ;"
        );
        assert_eq!(nom_parser::parse_readings(&line).unwrap(), readings);
    }
}
