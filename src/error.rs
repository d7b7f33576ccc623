use std::time::Duration;

use snafu::Snafu;

use crate::nom_parser::MalformedPayload;
use crate::session::{Mode, Outcome};

/// Failure of a protocol exchange. All of these abort the current mode
/// and leave the engine ready for the next command.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// No qualifying response arrived before the deadline.
    #[snafu(display("No response from the peer within {timeout:?}"))]
    Timeout { timeout: Duration },

    /// The initial data didn't follow the payload grammar.
    #[snafu(display("Initial data not received: {source}"))]
    MalformedPayload { source: MalformedPayload },

    /// The peer never acknowledged the commit payload; nothing was saved.
    #[snafu(display("Changes not saved: no acknowledgment within {timeout:?}"))]
    CommitRejected { timeout: Duration },

    /// The serial port failed.
    #[snafu(display("Serial I/O error: {source}"))]
    Io { source: std::io::Error },

    /// A session ended with an outcome its mode doesn't produce.
    #[snafu(display("{mode} ended with {outcome:?}"))]
    UnexpectedOutcome { mode: Mode, outcome: Outcome },
}

/// A local editing mistake by the operator. Nothing is sent to the peer,
/// the operator is simply asked again.
#[derive(Debug, Snafu, PartialEq)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum ValidationError {
    /// Selection outside of the listed entries. Indices start at 1.
    #[snafu(display("Selection {index} is out of range 1..={len}"))]
    OutOfRange { index: usize, len: usize },

    /// The decision isn't available at this point of the menu.
    #[snafu(display("{decision} is not possible while {at}"))]
    NotAllowed {
        decision: &'static str,
        at: &'static str,
    },

    /// A calibration value must be a finite number.
    #[snafu(display("Invalid calibration value {value}"))]
    InvalidValue { value: f64 },

    /// Input that doesn't name any decision.
    #[snafu(display("Unrecognized input {input:?}"))]
    Unrecognized { input: String },
}
