//! This module defines the records exchanged with the peer: sensor readings,
//! sensor enable flags and calibration tables. Names are checked on
//! construction so that everything decoded from the peer can be encoded
//! back into a line the peer accepts.

use arrayvec::ArrayVec;
use snafu::{ensure, Snafu};

/// Error type for this module
#[derive(Debug, Snafu, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// The name is empty or contains a protocol delimiter.
    #[snafu(display("Invalid name {name:?}"))]
    InvalidName { name: String },
    /// The value can't be represented on the wire.
    #[snafu(display("Invalid value {value}"))]
    InvalidValue { value: f64 },
    /// The value text isn't a decimal number.
    #[snafu(display("Invalid number {text:?}"))]
    InvalidNumber { text: String },
    /// The peer stores a fixed number of calibration parameters per sensor.
    #[snafu(display("Sensor {name} has more than {} calibration parameters", MAX_CALIB_PARAMETERS))]
    TooManyParameters { name: String },
}

/// Calibration parameters stored per sensor by the peer firmware.
pub const MAX_CALIB_PARAMETERS: usize = 3;

/// Name of the conductivity reading that the TSS estimate is derived from.
pub const EC_FIELD: &str = "EC";
/// Name of the derived total suspended solids field.
pub const TSS_FIELD: &str = "TSS";
/// Unit of the derived TSS field.
pub const TSS_UNIT: &str = "mg/L";

const TSS_SLOPE: f64 = 0.123 * 1000.0;
const TSS_OFFSET: f64 = 41.593;

// Characters that delimit groups or fields in one of the payload grammars.
const DELIMITERS: &[char] = &[';', ',', ':', '\n', '\r'];

fn check_name(name: &str, forbidden: &[char]) -> Result<String, Error> {
    let trimmed = name.trim();
    ensure!(
        !trimmed.is_empty() && !trimmed.contains(forbidden),
        InvalidNameSnafu { name }
    );
    Ok(trimmed.to_owned())
}

fn check_value(value: f64) -> Result<f64, Error> {
    ensure!(value.is_finite(), InvalidValueSnafu { value });
    Ok(value)
}

/// Estimate total suspended solids (mg/L) from conductivity (mS/cm),
/// rounded to two decimals.
///
/// ```
/// use sensorlink_proto::types::derive_tss;
/// assert_eq!(derive_tss(2.0), 204.41);
/// ```
pub fn derive_tss(ec: f64) -> f64 {
    ((ec * TSS_SLOPE - TSS_OFFSET) * 100.0).round() / 100.0
}

// Two decimals, as the peer firmware prints its readings.
fn reading_text(value: f64) -> String {
    format!("{:.2}", value)
}

/// A single named measurement from the peer.
///
/// Besides the numeric value the reading keeps the text it was decoded
/// from, so persistence sees exactly what the peer sent.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    name: String,
    value: f64,
    text: String,
    unit: String,
}

impl SensorReading {
    /// Create a new reading, its text is the value with two decimals.
    /// # Errors
    /// Returns [`Error::InvalidName`] if the name is empty or contains a delimiter,
    /// and [`Error::InvalidValue`] for NaN or infinite values.
    pub fn new(name: &str, value: f64, unit: &str) -> Result<Self, Error> {
        let value = check_value(value)?;
        Ok(Self {
            name: check_name(name, DELIMITERS)?,
            value,
            text: reading_text(value),
            unit: unit.trim().to_owned(),
        })
    }

    /// Create a reading from the value text as received, e.g. `0.0042`.
    /// # Errors
    /// As [`new`](Self::new), plus [`Error::InvalidNumber`] if `text` isn't
    /// a decimal number.
    pub fn from_text(name: &str, text: &str, unit: &str) -> Result<Self, Error> {
        let text = text.trim();
        let value = text
            .parse::<f64>()
            .map_err(|_| InvalidNumberSnafu { text }.build())?;
        let mut reading = Self::new(name, value, unit)?;
        reading.text = text.to_owned();
        Ok(reading)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn value(&self) -> f64 {
        self.value
    }

    /// The value as the peer wrote it.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The unit, empty for dimensionless readings such as pH.
    pub fn unit(&self) -> &str {
        &self.unit
    }
}

/// The decoded answer to a reading request.
///
/// `Time` and `Temperature` always lead the payload, the sensor list
/// follows in arrival order. When an `EC` reading is present the derived
/// `TSS` reading is stored right after it.
#[derive(Debug, Clone, PartialEq)]
pub struct Readings {
    read_time: String,
    temperature: f64,
    temperature_text: String,
    sensors: Vec<SensorReading>,
}

impl Readings {
    /// Build a reading set, inserting the derived TSS reading after EC.
    pub fn new(read_time: &str, temperature: f64, sensors: Vec<SensorReading>) -> Self {
        Self::with_temperature_text(read_time, temperature, reading_text(temperature), sensors)
    }

    /// As [`new`](Self::new), keeping the temperature text as received.
    pub(crate) fn with_temperature_text(
        read_time: &str,
        temperature: f64,
        temperature_text: String,
        sensors: Vec<SensorReading>,
    ) -> Self {
        let mut sensors = sensors;
        sensors.retain(|s| s.name != TSS_FIELD);
        if let Some(pos) = sensors.iter().position(|s| s.name == EC_FIELD) {
            let value = derive_tss(sensors[pos].value);
            let tss = SensorReading {
                name: TSS_FIELD.to_owned(),
                value,
                text: reading_text(value),
                unit: TSS_UNIT.to_owned(),
            };
            sensors.insert(pos + 1, tss);
        }
        Self {
            read_time: read_time.trim().to_owned(),
            temperature,
            temperature_text,
            sensors,
        }
    }

    /// Time of the measurement as reported by the peer, e.g. `12:30`.
    pub fn read_time(&self) -> &str {
        &self.read_time
    }

    pub const fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn temperature_text(&self) -> &str {
        &self.temperature_text
    }

    pub fn sensors(&self) -> &[SensorReading] {
        &self.sensors
    }

    /// Look up a reading by name, including the derived TSS reading.
    pub fn get(&self, name: &str) -> Option<&SensorReading> {
        self.sensors.iter().find(|s| s.name == name)
    }

    /// Flatten into the index-aligned field/value rows handed to persistence.
    /// Values are the peer's text, only the derived TSS is formatted here.
    pub fn record(&self) -> Record {
        let mut fields = Vec::with_capacity(self.sensors.len() + 2);
        let mut values = Vec::with_capacity(self.sensors.len() + 2);
        fields.push("Time".to_owned());
        values.push(self.read_time.clone());
        fields.push("Temperature".to_owned());
        values.push(self.temperature_text.clone());
        for sensor in &self.sensors {
            fields.push(sensor.name.clone());
            values.push(sensor.text.clone());
        }
        Record { fields, values }
    }
}

/// Field names and values of one reading, always of equal length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    fields: Vec<String>,
    values: Vec<String>,
}

impl Record {
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn into_parts(self) -> (Vec<String>, Vec<String>) {
        (self.fields, self.values)
    }
}

/// Persistence collaborator for completed reading requests.
///
/// Implementations own schema change detection and file rotation.
pub trait RecordSink {
    type Error;

    fn append(&mut self, record: &Record) -> Result<(), Self::Error>;
}

/// Enable flag of one sensor on the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorConfig {
    name: String,
    enabled: bool,
}

impl SensorConfig {
    /// # Errors
    /// Returns [`Error::InvalidName`] if the name is empty or contains a delimiter.
    pub fn new(name: &str, enabled: bool) -> Result<Self, Error> {
        Ok(Self {
            name: check_name(name, DELIMITERS)?,
            enabled,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn toggle(&mut self) {
        self.enabled = !self.enabled;
    }
}

/// One labelled calibration value, e.g. `Neutral (PH 7) Voltage` = 1500.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationParameter {
    name: String,
    value: f64,
}

impl CalibrationParameter {
    /// Labels may contain anything but the entry and group delimiters.
    /// # Errors
    /// Returns [`Error::InvalidName`] or [`Error::InvalidValue`].
    pub fn new(name: &str, value: f64) -> Result<Self, Error> {
        Ok(Self {
            name: check_name(name, &[';', ',', '\n', '\r'])?,
            value: check_value(value)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn value(&self) -> f64 {
        self.value
    }

    /// # Errors
    /// Returns [`Error::InvalidValue`] for NaN or infinite values, leaving
    /// the current value in place.
    pub fn set_value(&mut self, value: f64) -> Result<(), Error> {
        self.value = check_value(value)?;
        Ok(())
    }
}

pub(crate) type Parameters = ArrayVec<CalibrationParameter, MAX_CALIB_PARAMETERS>;

/// Calibration table of one sensor. Parameter order matches the positions
/// the peer expects in a `newcalibdata:` line.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSensor {
    name: String,
    parameters: Parameters,
}

impl CalibrationSensor {
    /// # Errors
    /// Returns [`Error::InvalidName`], or [`Error::TooManyParameters`] if more
    /// than [`MAX_CALIB_PARAMETERS`] parameters are given.
    pub fn new(
        name: &str,
        parameters: impl IntoIterator<Item = CalibrationParameter>,
    ) -> Result<Self, Error> {
        let name = check_name(name, DELIMITERS)?;
        let mut params = Parameters::new();
        for param in parameters {
            if params.try_push(param).is_err() {
                return TooManyParametersSnafu { name }.fail();
            }
        }
        Ok(Self {
            name,
            parameters: params,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[CalibrationParameter] {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut [CalibrationParameter] {
        &mut self.parameters
    }
}
