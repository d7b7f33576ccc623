//! The negotiation state machine behind the REQ, CONFIG and CALIB modes.
//!
//! [`Session`] is sans-io: each state is a struct whose methods consume it
//! and return the next state. The [`Master`](crate::Master) performs the
//! actual serial traffic between transitions.
//!
//! ```text
//! Idle -> Fetching -> Editing -> Committing -> Idle
//!            |           |   \-> Cancelling -> Idle
//!            \-----------+-----> Idle (timeout / malformed payload)
//! ```
//!
//! The working set is only ever encoded as a whole when entering
//! `Committing`, so an unacknowledged commit leaves nothing half written.
//!
//! # Example
//!
//! ```
//! use sensorlink_proto::session::{Decision, Session};
//!
//! let session = match Session::new() {
//!     Session::Idle(idle) => idle.request_config(),
//!     _ => unreachable!(),
//! };
//! let session = match session {
//!     Session::Fetching(fetch) => fetch.receive("Data#EC1;Tbd0;"),
//!     _ => unreachable!(),
//! };
//! let session = match session {
//!     Session::Editing(edit) => edit.decide(Decision::Select(2)),
//!     _ => unreachable!(),
//! };
//! match session {
//!     Session::Editing(edit) => match edit.decide(Decision::Commit) {
//!         Session::Committing(commit) => assert_eq!(commit.payload(), "newconfig:1;1;"),
//!         _ => unreachable!(),
//!     },
//!     _ => unreachable!(),
//! }
//! ```

use std::fmt;

use chrono::NaiveTime;

use crate::command::Request;
use crate::error::{
    Error, InvalidValueSnafu, NotAllowedSnafu, OutOfRangeSnafu, UnrecognizedSnafu,
    ValidationError,
};
use crate::nom_parser::{self, MalformedPayload};
use crate::types::{CalibrationParameter, CalibrationSensor, Readings, SensorConfig};

/// The operator chosen top-level command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Readings,
    Config,
    Calibration,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Readings => "REQ",
            Self::Config => "CONFIG",
            Self::Calibration => "CALIB",
        })
    }
}

/// What the operator wants to do next. Selections are 1-based.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// Toggle a sensor (CONFIG), or open a sensor or parameter (CALIB).
    Select(usize),
    /// Leave the parameter list or value entry without further changes.
    Back,
    /// Save the whole working set on the peer.
    Commit,
    /// Drop all edits.
    Cancel,
    /// New value for the parameter being edited.
    Set(f64),
}

impl Decision {
    const fn name(&self) -> &'static str {
        match self {
            Self::Select(_) => "select",
            Self::Back => "back",
            Self::Commit => "save",
            Self::Cancel => "cancel",
            Self::Set(_) => "set value",
        }
    }
}

/// The part of the working set the operator is currently looking at.
#[derive(Debug, Clone, Copy)]
pub enum View<'a> {
    /// Enable flags, toggled by selection.
    Config(&'a [SensorConfig]),
    /// Calibration sensors to pick from.
    Sensors(&'a [CalibrationSensor]),
    /// Parameters of one calibration sensor.
    Parameters(&'a CalibrationSensor),
    /// A parameter waiting for its new value.
    Value(&'a CalibrationSensor, &'a CalibrationParameter),
}

impl View<'_> {
    /// Turn operator text into a decision for this menu level: `save`,
    /// `cancel`, `back`, a 1-based index, or a value while a calibration
    /// parameter is open.
    pub fn interpret(&self, input: &str) -> Result<Decision, ValidationError> {
        let input = input.trim();
        match input.to_ascii_lowercase().as_str() {
            "save" | "s" => return Ok(Decision::Commit),
            "cancel" | "c" => return Ok(Decision::Cancel),
            "back" | "b" => return Ok(Decision::Back),
            _ => {}
        }
        if let View::Value(..) = self {
            return match input.parse::<f64>() {
                Ok(value) if value.is_finite() => Ok(Decision::Set(value)),
                Ok(value) => InvalidValueSnafu { value }.fail(),
                Err(_) => UnrecognizedSnafu { input }.fail(),
            };
        }
        input
            .parse::<usize>()
            .map(Decision::Select)
            .map_err(|_| UnrecognizedSnafu { input }.build())
    }
}

/// Interactive-selection collaborator.
pub trait Operator {
    /// Pick the next decision. `rejected` holds the reason the previous
    /// decision was refused, if it was.
    fn decide(&mut self, view: View<'_>, rejected: Option<&ValidationError>) -> Decision;
}

/// Successful end of a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Readings(Readings),
    /// The peer acknowledged the commit.
    Saved,
    Cancelled,
}

/// States of one protocol session.
#[derive(Debug)]
pub enum Session {
    /// No exchange in progress, holding the result of the previous one.
    Idle(Idle),
    /// The initial request is outstanding.
    Fetching(Fetching),
    /// The operator edits the working set.
    Editing(Editing),
    /// The encoded working set waits for the peer's acknowledgment.
    Committing(Committing),
    /// The cancellation notice waits to be sent.
    Cancelling(Cancelling),
}

impl Session {
    pub fn new() -> Self {
        Idle::default().into()
    }

    /// Leave the current state early, e.g. on the exchange timeout.
    /// Pending edits are discarded.
    pub fn abort(self, error: Error) -> Self {
        match self {
            Self::Idle(idle) => idle.into(),
            _ => Idle::finished(Err(error)),
        }
    }

    pub fn mode(&self) -> Option<Mode> {
        match self {
            Self::Idle(_) => None,
            Self::Fetching(s) => Some(s.mode),
            Self::Editing(s) => Some(s.mode()),
            Self::Committing(s) => Some(s.mode),
            Self::Cancelling(s) => Some(s.mode),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Idle> for Session {
    fn from(x: Idle) -> Self {
        Self::Idle(x)
    }
}

impl From<Fetching> for Session {
    fn from(x: Fetching) -> Self {
        Self::Fetching(x)
    }
}

impl From<Editing> for Session {
    fn from(x: Editing) -> Self {
        Self::Editing(x)
    }
}

impl From<Committing> for Session {
    fn from(x: Committing) -> Self {
        Self::Committing(x)
    }
}

impl From<Cancelling> for Session {
    fn from(x: Cancelling) -> Self {
        Self::Cancelling(x)
    }
}

/// Struct for the idle state.
#[derive(Debug, Default)]
pub struct Idle {
    result: Option<Result<Outcome, Error>>,
}

impl Idle {
    fn finished(result: Result<Outcome, Error>) -> Session {
        Self {
            result: Some(result),
        }
        .into()
    }

    /// Start a reading request, stamped with the host's current time.
    pub fn request_readings(self, now: NaiveTime) -> Session {
        Fetching::new(Mode::Readings, Request::Readings(now))
    }

    pub fn request_config(self) -> Session {
        Fetching::new(Mode::Config, Request::Config)
    }

    pub fn request_calibration(self) -> Session {
        Fetching::new(Mode::Calibration, Request::Calibration)
    }

    /// Result of the session that just ended, `None` for a fresh session.
    pub fn result(&self) -> Option<&Result<Outcome, Error>> {
        self.result.as_ref()
    }

    pub fn into_result(self) -> Option<Result<Outcome, Error>> {
        self.result
    }
}

/// Struct for the state waiting on the initial payload.
#[derive(Debug)]
pub struct Fetching {
    mode: Mode,
    request: Request,
}

impl Fetching {
    fn new(mode: Mode, request: Request) -> Session {
        Self { mode, request }.into()
    }

    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// The request line to repeat until the payload arrives.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Decode the payload line. A malformed payload ends the session.
    pub fn receive(self, line: &str) -> Session {
        let decoded: Result<Session, MalformedPayload> = match self.mode {
            Mode::Readings => nom_parser::parse_readings(line)
                .map(|readings| Idle::finished(Ok(Outcome::Readings(readings)))),
            Mode::Config => nom_parser::parse_config(line)
                .map(|config| Editing::new(WorkingSet::Config(config)).into()),
            Mode::Calibration => nom_parser::parse_calibration(line)
                .map(|sensors| Editing::new(WorkingSet::Calibration(sensors)).into()),
        };
        decoded.unwrap_or_else(|source| {
            log::warn!("{} payload rejected: {}", self.mode, source);
            Idle::finished(Err(Error::MalformedPayload { source }))
        })
    }

    /// The request failed, usually with [`Error::Timeout`].
    pub fn fail(self, error: Error) -> Session {
        Idle::finished(Err(error))
    }
}

#[derive(Debug)]
enum WorkingSet {
    Config(Vec<SensorConfig>),
    Calibration(Vec<CalibrationSensor>),
}

// Zero-based positions inside the CALIB menu.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Cursor {
    Sensors,
    Parameters(usize),
    Value(usize, usize),
}

impl Cursor {
    const fn describe(self) -> &'static str {
        match self {
            Self::Sensors => "selecting a sensor",
            Self::Parameters(_) => "selecting a parameter",
            Self::Value(..) => "entering a value",
        }
    }
}

enum Step {
    Stay,
    Commit,
    Cancel,
}

fn check_index(index: usize, len: usize) -> Result<usize, ValidationError> {
    if (1..=len).contains(&index) {
        Ok(index - 1)
    } else {
        OutOfRangeSnafu { index, len }.fail()
    }
}

/// Struct for the editing state. Owns the working copy.
#[derive(Debug)]
pub struct Editing {
    working: WorkingSet,
    cursor: Cursor,
    rejected: Option<ValidationError>,
}

impl Editing {
    fn new(working: WorkingSet) -> Self {
        Self {
            working,
            cursor: Cursor::Sensors,
            rejected: None,
        }
    }

    pub const fn mode(&self) -> Mode {
        match self.working {
            WorkingSet::Config(_) => Mode::Config,
            WorkingSet::Calibration(_) => Mode::Calibration,
        }
    }

    /// What to show the operator.
    pub fn view(&self) -> View<'_> {
        match (&self.working, self.cursor) {
            (WorkingSet::Config(config), _) => View::Config(config),
            (WorkingSet::Calibration(sensors), Cursor::Sensors) => View::Sensors(sensors),
            (WorkingSet::Calibration(sensors), Cursor::Parameters(s)) => {
                View::Parameters(&sensors[s])
            }
            (WorkingSet::Calibration(sensors), Cursor::Value(s, p)) => {
                View::Value(&sensors[s], &sensors[s].parameters()[p])
            }
        }
    }

    /// Why the last decision was refused.
    pub fn rejected(&self) -> Option<&ValidationError> {
        self.rejected.as_ref()
    }

    /// Apply an operator decision. Invalid decisions keep the session in
    /// `Editing` with [`rejected`](Self::rejected) set.
    pub fn decide(mut self, decision: Decision) -> Session {
        self.rejected = None;
        match self.step(decision) {
            Ok(Step::Stay) => self.into(),
            Ok(Step::Commit) => Committing::new(self.working),
            Ok(Step::Cancel) => Cancelling::new(self.mode(), None),
            Err(e) => {
                log::debug!("Decision {:?} rejected: {}", decision, e);
                self.rejected = Some(e);
                self.into()
            }
        }
    }

    fn step(&mut self, decision: Decision) -> Result<Step, ValidationError> {
        match (&mut self.working, self.cursor, decision) {
            // available at every menu level; an open value entry is dropped
            (_, _, Decision::Commit) => Ok(Step::Commit),
            (_, _, Decision::Cancel) => Ok(Step::Cancel),

            (WorkingSet::Config(config), _, Decision::Select(index)) => {
                let i = check_index(index, config.len())?;
                config[i].toggle();
                Ok(Step::Stay)
            }

            (WorkingSet::Calibration(sensors), Cursor::Sensors, Decision::Select(index)) => {
                self.cursor = Cursor::Parameters(check_index(index, sensors.len())?);
                Ok(Step::Stay)
            }
            (WorkingSet::Calibration(sensors), Cursor::Parameters(s), Decision::Select(index)) => {
                let p = check_index(index, sensors[s].parameters().len())?;
                self.cursor = Cursor::Value(s, p);
                Ok(Step::Stay)
            }
            (WorkingSet::Calibration(_), Cursor::Parameters(_), Decision::Back) => {
                self.cursor = Cursor::Sensors;
                Ok(Step::Stay)
            }
            (WorkingSet::Calibration(_), Cursor::Value(s, _), Decision::Back) => {
                self.cursor = Cursor::Parameters(s);
                Ok(Step::Stay)
            }
            (WorkingSet::Calibration(sensors), Cursor::Value(s, p), Decision::Set(value)) => {
                sensors[s].parameters_mut()[p]
                    .set_value(value)
                    .map_err(|_| InvalidValueSnafu { value }.build())?;
                self.cursor = Cursor::Parameters(s);
                Ok(Step::Stay)
            }

            (_, cursor, _) => NotAllowedSnafu {
                decision: decision.name(),
                at: cursor.describe(),
            }
            .fail(),
        }
    }

    /// Turn operator text into a decision, see [`View::interpret`].
    pub fn interpret(&self, input: &str) -> Result<Decision, ValidationError> {
        self.view().interpret(input)
    }

    /// The operator ran out of time. Edits are dropped and the peer is told
    /// to stop waiting; the session then ends with `error`.
    pub fn expire(self, error: Error) -> Session {
        log::debug!("{} editing expired: {}", self.mode(), error);
        Cancelling::new(self.mode(), Some(error))
    }
}

/// Struct for the commit state. The payload is encoded once, on entry,
/// and resent verbatim.
#[derive(Debug)]
pub struct Committing {
    mode: Mode,
    payload: String,
}

impl Committing {
    fn new(working: WorkingSet) -> Session {
        let (mode, request) = match &working {
            WorkingSet::Config(config) => (Mode::Config, Request::new_config(config)),
            WorkingSet::Calibration(sensors) => {
                (Mode::Calibration, Request::new_calibration(sensors))
            }
        };
        Self {
            mode,
            payload: request.to_line(),
        }
        .into()
    }

    pub const fn mode(&self) -> Mode {
        self.mode
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// The peer acknowledged the payload; changes are saved.
    pub fn acknowledged(self) -> Session {
        Idle::finished(Ok(Outcome::Saved))
    }

    /// No acknowledgment; the edits are dropped.
    pub fn fail(self, error: Error) -> Session {
        Idle::finished(Err(error))
    }
}

/// Struct for the cancel state. `pending` is the error the session ends
/// with once the notice is out, `None` for an operator cancel.
#[derive(Debug)]
pub struct Cancelling {
    mode: Mode,
    request: Request,
    pending: Option<Error>,
}

impl Cancelling {
    fn new(mode: Mode, pending: Option<Error>) -> Session {
        let request = match mode {
            Mode::Calibration => Request::CancelCalibration,
            _ => Request::CancelConfig,
        };
        Self {
            mode,
            request,
            pending,
        }
        .into()
    }

    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// The cancellation notice; no answer is expected.
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn sent(self) -> Session {
        match self.pending {
            Some(error) => Idle::finished(Err(error)),
            None => Idle::finished(Ok(Outcome::Cancelled)),
        }
    }

    /// The notice couldn't be written. An expired session still reports
    /// its original error.
    pub fn fail(self, error: Error) -> Session {
        match self.pending {
            Some(pending) => {
                log::warn!("{} cancel notice not sent: {}", self.mode, error);
                Idle::finished(Err(pending))
            }
            None => Idle::finished(Err(error)),
        }
    }
}
