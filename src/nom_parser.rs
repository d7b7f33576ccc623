//! Decoders for the peer's `Data#` payload lines, and for the host command
//! lines as seen from the peer side.
//!
//! Payloads are split on `;` into groups first, each group is then run
//! through a small nom grammar. A failure anywhere is reported as a
//! [`MalformedPayload`] naming the group, never as a panic.

use nom::branch::alt;
use nom::bytes::complete::{tag, take_till1, take_while_m_n};
use nom::character::complete::{char, digit1, one_of, space0};
use nom::combinator::{all_consuming, map, map_opt, map_res, opt, recognize, rest, value, verify};
use nom::multi::{many0, separated_list0};
use nom::number::complete::double;
use nom::sequence::{pair, preceded, separated_pair, terminated, tuple};
use nom::IResult;
use snafu::{ensure, Snafu};

use crate::types::{
    CalibrationParameter, CalibrationSensor, Error as TypesError, Readings, SensorConfig,
    SensorReading, MAX_CALIB_PARAMETERS,
};
use crate::DATA_MARKER;

/// A response line that doesn't follow the grammar of the requested payload.
#[derive(Debug, Snafu, PartialEq)]
#[non_exhaustive]
pub enum MalformedPayload {
    /// The line doesn't start with the `Data#` marker. Busy tokens end up here too.
    #[snafu(display("Missing payload marker in {line:?}"))]
    MissingMarker { line: String },
    /// Nothing follows the marker.
    #[snafu(display("Payload carries no groups"))]
    NoGroups,
    /// A group doesn't match the grammar.
    #[snafu(display("Group {index} {group:?}: {reason}"))]
    MalformedGroup {
        index: usize,
        group: String,
        reason: &'static str,
    },
    /// A fixed position field has the wrong name.
    #[snafu(display("Group {index}: expected {expected}, found {found:?}"))]
    UnexpectedField {
        index: usize,
        expected: &'static str,
        found: String,
    },
    /// More calibration entries than the peer can store.
    #[snafu(display(
        "Group {index} {group:?}: more than {} calibration parameters",
        MAX_CALIB_PARAMETERS
    ))]
    TooManyParameters { index: usize, group: String },
}

type Result<T, E = MalformedPayload> = std::result::Result<T, E>;

/// Does the line carry the payload marker?
pub fn is_payload(line: &str) -> bool {
    line.trim_start().starts_with(DATA_MARKER)
}

fn strip_marker(line: &str) -> Result<&str> {
    let marker: IResult<&str, &str> = tag(DATA_MARKER)(line.trim());
    match marker {
        Ok((body, _)) => Ok(body),
        Err(_) => MissingMarkerSnafu { line }.fail(),
    }
}

/// Split a payload body into its `;` separated groups. The segment after the
/// last `;` may be empty, any other empty group is an error.
fn groups(body: &str) -> Result<Vec<&str>> {
    let mut groups: Vec<&str> = body.split(';').map(str::trim).collect();
    if groups.last().map_or(false, |g| g.is_empty()) {
        groups.pop();
    }
    ensure!(!groups.is_empty(), NoGroupsSnafu);
    if let Some(index) = groups.iter().position(|g| g.is_empty()) {
        return MalformedGroupSnafu {
            index,
            group: "",
            reason: "empty group",
        }
        .fail();
    }
    Ok(groups)
}

fn malformed(index: usize, group: &str, reason: &'static str) -> MalformedPayload {
    MalformedGroupSnafu {
        index,
        group,
        reason,
    }
    .build()
}

fn run<'a, O>(
    parser: impl FnMut(&'a str) -> IResult<&'a str, O>,
    index: usize,
    group: &'a str,
    reason: &'static str,
) -> Result<O> {
    all_consuming(parser)(group)
        .map(|(_, out)| out)
        .map_err(|_| malformed(index, group, reason))
}

/// `<name>: <value> <unit>`, value is a decimal or a `HH:MM` time.
fn reading_field(input: &str) -> IResult<&str, (&str, &str, &str)> {
    let (input, name) = terminated(take_till1(|c: char| c == ':'), char(':'))(input)?;
    let (input, value) = preceded(
        space0,
        recognize(tuple((
            opt(one_of("+-")),
            digit1,
            opt(pair(one_of(".:"), digit1)),
        ))),
    )(input)?;
    let (input, unit) = preceded(space0, rest)(input)?;
    Ok((input, (name.trim(), value, unit.trim())))
}

fn decimal(index: usize, group: &str, value: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .map_err(|_| malformed(index, group, "non-numeric value"))
}

/// Parse the answer to a reading request,
/// e.g. `Data#Time:12:30 ;Temperature:25.00 ;EC:2.00 mS/cm;`.
///
/// `Time` and `Temperature` must be the first two fields. If an `EC` reading
/// is present, the derived `TSS` reading is inserted right after it.
pub fn parse_readings(line: &str) -> Result<Readings> {
    let groups = groups(strip_marker(line)?)?;
    let mut fields = Vec::with_capacity(groups.len());
    for (index, group) in groups.iter().copied().enumerate() {
        fields.push(run(reading_field, index, group, "expected <name>: <value> <unit>")?);
    }

    let mut fields = fields.into_iter().enumerate();
    let mut fixed = |expected: &'static str| match fields.next() {
        Some((_, (name, value, _))) if name == expected => Ok(value),
        Some((index, (name, _, _))) => UnexpectedFieldSnafu {
            index,
            expected,
            found: name,
        }
        .fail(),
        None => UnexpectedFieldSnafu {
            index: groups.len(),
            expected,
            found: "",
        }
        .fail(),
    };
    let read_time = fixed("Time")?;
    let temperature_text = fixed("Temperature")?;
    let temperature = decimal(1, groups[1], temperature_text)?;

    let mut sensors = Vec::with_capacity(groups.len() - 2);
    for (index, (name, value, unit)) in fields {
        let reading = SensorReading::from_text(name, value, unit).map_err(|e| match e {
            TypesError::InvalidNumber { .. } => malformed(index, groups[index], "non-numeric value"),
            _ => malformed(index, groups[index], "invalid reading"),
        })?;
        sensors.push(reading);
    }
    Ok(Readings::with_temperature_text(
        read_time,
        temperature,
        temperature_text.to_owned(),
        sensors,
    ))
}

/// `<name><0|1>`, the flag is the last character of the group.
fn config_entry(input: &str) -> IResult<&str, (&str, bool)> {
    map_opt(rest, |group: &str| {
        let name = group.get(..group.len().checked_sub(1)?)?;
        let enabled = match group.as_bytes().last()? {
            b'0' => false,
            b'1' => true,
            _ => return None,
        };
        (!name.trim().is_empty()).then(|| (name, enabled))
    })(input)
}

/// Parse the sensor enable list, e.g. `Data#EC1;Tbd0;`.
/// Arrival order is kept, it is the index the operator selects by.
pub fn parse_config(line: &str) -> Result<Vec<SensorConfig>> {
    let groups = groups(strip_marker(line)?)?;
    let mut config: Vec<SensorConfig> = Vec::with_capacity(groups.len());
    for (index, group) in groups.iter().copied().enumerate() {
        let (name, enabled) = run(config_entry, index, group, "expected <name><0|1>")?;
        let entry = SensorConfig::new(name, enabled)
            .map_err(|_| malformed(index, group, "invalid sensor name"))?;
        if config.iter().any(|c| c.name() == entry.name()) {
            return Err(malformed(index, group, "duplicate sensor name"));
        }
        config.push(entry);
    }
    Ok(config)
}

/// `<label>_<value>`, anchored on the last `_` of the entry.
fn calib_entry(input: &str) -> IResult<&str, (&str, f64)> {
    map_opt(take_till1(|c: char| c == ','), |entry: &str| {
        let (label, value) = entry.rsplit_once('_')?;
        let value = value.trim().parse::<f64>().ok().filter(|v| v.is_finite())?;
        (!label.trim().is_empty()).then(|| (label, value))
    })(input)
}

/// `<name>:<label>_<value>,<label>_<value>,`
fn calib_group(input: &str) -> IResult<&str, (&str, Vec<(&str, f64)>)> {
    separated_pair(
        take_till1(|c: char| c == ':'),
        char(':'),
        terminated(separated_list0(char(','), calib_entry), opt(char(','))),
    )(input)
}

/// Parse the calibration table,
/// e.g. `Data#PH:Neutral (PH 7) Voltage_1500.00,Acid (PH 4) Voltage_2032.44,;`.
pub fn parse_calibration(line: &str) -> Result<Vec<CalibrationSensor>> {
    let groups = groups(strip_marker(line)?)?;
    let mut sensors = Vec::with_capacity(groups.len());
    for (index, group) in groups.iter().copied().enumerate() {
        let (name, entries) = run(calib_group, index, group, "expected <name>:<label>_<value>,")?;
        if entries.len() > MAX_CALIB_PARAMETERS {
            return TooManyParametersSnafu { index, group }.fail();
        }
        let mut parameters = Vec::with_capacity(entries.len());
        for (label, value) in entries {
            let param = CalibrationParameter::new(label, value)
                .map_err(|_| malformed(index, group, "invalid parameter label"))?;
            parameters.push(param);
        }
        let sensor = CalibrationSensor::new(name, parameters)
            .map_err(|_| malformed(index, group, "invalid sensor name"))?;
        sensors.push(sensor);
    }
    Ok(sensors)
}

/// Host command lines, decoded on the peer side.
pub(crate) mod node {
    use super::*;
    use crate::command::{
        CALIB_REQUEST, CANCEL_CALIB_PREFIX, CANCEL_CONFIG_PREFIX, CONFIG_REQUEST,
        NEW_CALIB_PREFIX, NEW_CONFIG_PREFIX,
    };
    use crate::node::Command;
    use crate::RECEIVED_LINE;
    use chrono::NaiveTime;

    pub(crate) fn parse_command(line: &str) -> Option<Command> {
        all_consuming(alt((
            value(Command::Config, tag(CONFIG_REQUEST)),
            value(Command::ManualCalib, tag(CALIB_REQUEST)),
            value(Command::Received, tag(RECEIVED_LINE)),
            value(Command::CancelConfig, tag(CANCEL_CONFIG_PREFIX)),
            value(Command::CancelCalib, tag(CANCEL_CALIB_PREFIX)),
            map(preceded(tag(NEW_CONFIG_PREFIX), flags), Command::NewConfig),
            map(preceded(tag(NEW_CALIB_PREFIX), calib_values), Command::NewCalibData),
            map(time, Command::Time),
        )))(line.trim())
        .ok()
        .map(|(_, command)| command)
    }

    fn two_digits(input: &str) -> IResult<&str, u32> {
        map_res(take_while_m_n(2, 2, |c: char| c.is_ascii_digit()), |s: &str| {
            s.parse::<u32>()
        })(input)
    }

    fn time(input: &str) -> IResult<&str, NaiveTime> {
        map_opt(separated_pair(two_digits, char(':'), two_digits), |(h, m)| {
            NaiveTime::from_hms_opt(h, m, 0)
        })(input)
    }

    /// `1;0;1;`
    fn flags(input: &str) -> IResult<&str, Vec<bool>> {
        many0(terminated(
            alt((value(false, char('0')), value(true, char('1')))),
            char(';'),
        ))(input)
    }

    /// `1.5,2,;;3,;` one `;` terminated group per sensor, entries `,` terminated.
    fn calib_values(input: &str) -> IResult<&str, Vec<Vec<f64>>> {
        many0(terminated(
            many0(terminated(verify(double, |v: &f64| v.is_finite()), char(','))),
            char(';'),
        ))(input)
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readings() {
        let r = parse_readings(
            "Data#Time:12:30 ;Temperature:25.06 ;EC:2.00 mS/cm;Tbd:10.50 NTU;PH:7.01 ;",
        )
        .unwrap();
        assert_eq!(r.read_time(), "12:30");
        assert_eq!(r.temperature(), 25.06);
        let names: Vec<_> = r.sensors().iter().map(|s| s.name()).collect();
        assert_eq!(names, ["EC", "TSS", "Tbd", "PH"]);
        assert_eq!(r.get("TSS").unwrap().value(), 204.41);
        assert_eq!(r.get("Tbd").unwrap().unit(), "NTU");
        assert_eq!(r.get("PH").unwrap().unit(), "");

        let record = r.record();
        assert_eq!(
            record.fields(),
            ["Time", "Temperature", "EC", "TSS", "Tbd", "PH"]
        );
        assert_eq!(record.values()[3], "204.41");
    }

    #[test]
    fn test_readings_keep_peer_text() {
        let r = parse_readings(
            "Data#Time:12:30 ;Temperature:25.125 ;NH3N:0.0042 mg/L;EC:1.4134 mS/cm;",
        )
        .unwrap();
        assert_eq!(r.temperature_text(), "25.125");
        assert_eq!(r.get("NH3N").unwrap().text(), "0.0042");
        assert_eq!(
            r.record().values(),
            ["12:30", "25.125", "0.0042", "1.4134", "132.26"]
        );
    }

    #[test]
    fn test_readings_tolerant_spacing() {
        let r = parse_readings("Data#Time: 08:15;Temperature: -1.50;NH3N: 0.25 mg/L").unwrap();
        assert_eq!(r.temperature(), -1.5);
        assert_eq!(r.get("NH3N").unwrap().value(), 0.25);
        assert_eq!(r.get("NH3N").unwrap().unit(), "mg/L");
    }

    #[test]
    fn test_readings_field_order() {
        assert_eq!(
            parse_readings("Data#Temperature:25.00 ;Time:12:30 ;"),
            Err(MalformedPayload::UnexpectedField {
                index: 0,
                expected: "Time",
                found: "Temperature".to_owned()
            })
        );
        assert_eq!(
            parse_readings("Data#Time:12:30 ;"),
            Err(MalformedPayload::UnexpectedField {
                index: 1,
                expected: "Temperature",
                found: String::new()
            })
        );
        assert!(matches!(
            parse_readings("Data#Time:12:30 ;Temperature:12:30 ;"),
            Err(MalformedPayload::MalformedGroup { index: 1, .. })
        ));
    }

    #[test]
    fn test_readings_malformed() {
        assert!(matches!(
            parse_readings("CALIB"),
            Err(MalformedPayload::MissingMarker { .. })
        ));
        assert!(matches!(
            parse_readings("Data#Time:12:30 ;Temperature:25.00 ;EC:nan mS/cm;"),
            Err(MalformedPayload::MalformedGroup { index: 2, .. })
        ));
        assert_eq!(parse_readings("Data#"), Err(MalformedPayload::NoGroups));
    }

    #[test]
    fn test_config() {
        let config = parse_config("Data#EC1;Tbd0;").unwrap();
        assert_eq!(
            config,
            [
                SensorConfig::new("EC", true).unwrap(),
                SensorConfig::new("Tbd", false).unwrap()
            ]
        );
        // digits inside a name are fine, only the last character is the flag
        let config = parse_config("Data#NH3N1;PH0").unwrap();
        assert_eq!(config[0].name(), "NH3N");
        assert!(config[0].enabled());
        assert_eq!(config[1].name(), "PH");
    }

    #[test]
    fn test_config_malformed() {
        assert!(matches!(
            parse_config("Data#EC1;Tbd2;"),
            Err(MalformedPayload::MalformedGroup { index: 1, .. })
        ));
        assert!(matches!(
            parse_config("Data#1;"),
            Err(MalformedPayload::MalformedGroup { index: 0, .. })
        ));
        assert!(matches!(
            parse_config("Data#EC1;;Tbd0;"),
            Err(MalformedPayload::MalformedGroup { index: 1, .. })
        ));
        assert!(matches!(
            parse_config("Data#EC1;EC0;"),
            Err(MalformedPayload::MalformedGroup { index: 1, .. })
        ));
        assert!(matches!(
            parse_config("CALIBData#EC1;"),
            Err(MalformedPayload::MissingMarker { .. })
        ));
    }

    #[test]
    fn test_calibration() {
        let sensors = parse_calibration(
            "Data#EC:K Value Low (1.413 mS/cm)_1.00,K Value High (2.76 mS/cm or 12.88 mS/cm)_1.02,;\
             PH:Neutral (PH 7) Voltage_1500.00,Acid (PH 4) Voltage_2032.44,;NH3N:;",
        )
        .unwrap();
        assert_eq!(sensors.len(), 3);
        assert_eq!(sensors[0].name(), "EC");
        let ec = sensors[0].parameters();
        assert_eq!(ec[0].name(), "K Value Low (1.413 mS/cm)");
        assert_eq!(ec[0].value(), 1.0);
        assert_eq!(ec[1].name(), "K Value High (2.76 mS/cm or 12.88 mS/cm)");
        assert_eq!(ec[1].value(), 1.02);
        assert_eq!(sensors[1].parameters()[1].value(), 2032.44);
        assert!(sensors[2].parameters().is_empty());
    }

    #[test]
    fn test_calibration_label_anchor() {
        let sensors = parse_calibration("Data#Tbd:raw_adc_3.5,offset_-2").unwrap();
        let params = sensors[0].parameters();
        assert_eq!(params[0].name(), "raw_adc");
        assert_eq!(params[0].value(), 3.5);
        assert_eq!(params[1].name(), "offset");
        assert_eq!(params[1].value(), -2.0);
    }

    #[test]
    fn test_calibration_malformed() {
        assert!(matches!(
            parse_calibration("Data#EC:K Value_abc,;"),
            Err(MalformedPayload::MalformedGroup { index: 0, .. })
        ));
        assert!(matches!(
            parse_calibration("Data#EC:K Value_1.0,;PH:no value,;"),
            Err(MalformedPayload::MalformedGroup { index: 1, .. })
        ));
        assert!(matches!(
            parse_calibration("Data#EC:a_1,,b_2,;"),
            Err(MalformedPayload::MalformedGroup { index: 0, .. })
        ));
        assert!(matches!(
            parse_calibration("Data#EC"),
            Err(MalformedPayload::MalformedGroup { index: 0, .. })
        ));
        assert_eq!(
            parse_calibration("Data#Tbd:a_1,b_2,c_3,d_4,;"),
            Err(MalformedPayload::TooManyParameters {
                index: 0,
                group: "Tbd:a_1,b_2,c_3,d_4,".to_owned()
            })
        );
    }

    #[test]
    fn test_repeated_malformed() {
        for _ in 0..3 {
            assert!(parse_config("garbage").is_err());
            assert!(parse_calibration("CALIB").is_err());
            assert!(parse_readings("Data#;;").is_err());
        }
    }
}
