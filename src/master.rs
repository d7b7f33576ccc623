//! The host side protocol engine.
//!
//! [`Master`] owns the transport and the wake line. Each top-level command
//! (REQ, CONFIG, CALIB) raises the wake line, drives a [`Session`] from
//! `Fetching` back to `Idle`, and releases the line again however the
//! command ended.

use std::time::{Duration, Instant};

use chrono::NaiveTime;
use snafu::ResultExt;

use crate::error::{CommitRejectedSnafu, Error, IoSnafu, TimeoutSnafu, UnexpectedOutcomeSnafu};
use crate::nom_parser;
use crate::session::{Decision, Idle, Mode, Operator, Outcome, Session, View};
use crate::transport::{Clock, SystemClock, Transport};
use crate::types::Readings;
use crate::wake::{WakeGuard, WakeSignal};
use crate::{ValidationError, ACK_TOKEN, BUSY_TOKEN, RECEIVED_LINE};

/// Deadlines and retry cadence of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Overall deadline of a fetch and the editing that follows it.
    pub exchange_timeout: Duration,
    /// How long a single request attempt waits for a line.
    pub read_timeout: Duration,
    /// Minimum spacing of "peer is busy" log notices.
    pub busy_notice_interval: Duration,
    /// Resend cadence of a commit payload.
    pub commit_interval: Duration,
    /// Deadline for the commit acknowledgment.
    pub commit_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            exchange_timeout: Duration::from_secs(60),
            read_timeout: Duration::from_secs(1),
            busy_notice_interval: Duration::from_secs(3),
            commit_interval: Duration::from_secs(3),
            commit_timeout: Duration::from_secs(60),
        }
    }
}

impl Timing {
    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_busy_notice_interval(mut self, interval: Duration) -> Self {
        self.busy_notice_interval = interval;
        self
    }

    pub fn with_commit_interval(mut self, interval: Duration) -> Self {
        self.commit_interval = interval;
        self
    }

    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }
}

/// Rate limit for busy token notices.
#[derive(Debug)]
struct BusyNotice {
    interval: Duration,
    last: Option<Instant>,
}

impl BusyNotice {
    const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    fn should_report(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

// Borrowed view of the engine used while the wake guard holds the wake line.
struct Link<'a, T, C> {
    transport: &'a mut T,
    clock: &'a C,
    timing: &'a Timing,
}

impl<T: Transport, C: Clock> Link<'_, T, C> {
    fn send_until(
        &mut self,
        request: &str,
        deadline: Instant,
        timeout: Duration,
        accept: impl Fn(&str) -> bool,
    ) -> Result<String, Error> {
        let mut busy = BusyNotice::new(self.timing.busy_notice_interval);
        loop {
            let now = self.clock.now();
            if now >= deadline {
                log::warn!("No answer to {:?} within {:?}", request, timeout);
                return TimeoutSnafu { timeout }.fail();
            }
            log::debug!("-> {}", request);
            self.transport.write_line(request).context(IoSnafu)?;
            let wait = self.timing.read_timeout.min(deadline - now);
            match self.transport.read_line(wait).context(IoSnafu)? {
                Some(line) if accept(&line) => {
                    log::debug!("<- {}", line);
                    return Ok(line);
                }
                Some(line) if line.trim() == BUSY_TOKEN => {
                    if busy.should_report(self.clock.now()) {
                        log::info!("Peer is calibrating, waiting");
                    }
                }
                Some(line) => log::debug!("Ignoring {:?}", line),
                None => {}
            }
        }
    }

    fn commit(&mut self, payload: &str, timeout: Duration) -> Result<(), Error> {
        let deadline = self.clock.now() + timeout;
        loop {
            let start = self.clock.now();
            if start >= deadline {
                log::warn!("Commit not acknowledged within {:?}", timeout);
                return CommitRejectedSnafu { timeout }.fail();
            }
            log::debug!("-> {}", payload);
            self.transport.write_line(payload).context(IoSnafu)?;
            let wait = self.timing.read_timeout.min(deadline - start);
            if let Some(line) = self.transport.read_line(wait).context(IoSnafu)? {
                if line == ACK_TOKEN {
                    log::debug!("<- {}", line);
                    return Ok(());
                }
                log::debug!("Waiting for acknowledgment, ignoring {:?}", line);
            }
            let next = (start + self.timing.commit_interval).min(deadline);
            let now = self.clock.now();
            if next > now {
                self.clock.sleep(next - now);
            }
        }
    }
}

// Reading requests never enter `Editing`.
struct NoOperator;

impl Operator for NoOperator {
    fn decide(&mut self, _view: View<'_>, _rejected: Option<&ValidationError>) -> Decision {
        Decision::Cancel
    }
}

/// Host side of the link.
#[derive(Debug)]
pub struct Master<T, W, C = SystemClock> {
    transport: T,
    wake: W,
    clock: C,
    timing: Timing,
}

impl<T: Transport, W: WakeSignal> Master<T, W> {
    pub fn new(transport: T, wake: W, timing: Timing) -> Self {
        Self::with_clock(transport, wake, timing, SystemClock)
    }
}

impl<T: Transport, W: WakeSignal, C: Clock> Master<T, W, C> {
    /// Engine measuring its deadlines on `clock`.
    pub fn with_clock(transport: T, wake: W, timing: Timing, clock: C) -> Self {
        Self {
            transport,
            wake,
            clock,
            timing,
        }
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn wake(&self) -> &W {
        &self.wake
    }

    pub fn into_parts(self) -> (T, W, C) {
        (self.transport, self.wake, self.clock)
    }

    fn link(&mut self) -> Link<'_, T, C> {
        Link {
            transport: &mut self.transport,
            clock: &self.clock,
            timing: &self.timing,
        }
    }

    /// Send `request` and read one line, over and over, until a line
    /// satisfies `accept`.
    ///
    /// Busy tokens are noted at most once per
    /// [`busy_notice_interval`](Timing::busy_notice_interval) and count
    /// against `timeout` like any other line.
    ///
    /// # Errors
    /// [`Error::Timeout`] once `timeout` has elapsed, [`Error::Io`] if the
    /// transport fails.
    pub fn send_until_response(
        &mut self,
        request: &str,
        timeout: Duration,
        accept: impl Fn(&str) -> bool,
    ) -> Result<String, Error> {
        let deadline = self.clock.now() + timeout;
        self.link().send_until(request, deadline, timeout, accept)
    }

    /// Resend `payload` every [`commit_interval`](Timing::commit_interval)
    /// until the peer answers with exactly `newdatareceived`.
    ///
    /// # Errors
    /// [`Error::CommitRejected`] if no acknowledgment arrives within `timeout`.
    pub fn commit(&mut self, payload: &str, timeout: Duration) -> Result<(), Error> {
        self.link().commit(payload, timeout)
    }

    /// Fetch one set of readings. `now` is sent to the peer as `HH:MM`.
    pub fn request_readings(&mut self, now: NaiveTime) -> Result<Readings, Error> {
        let session = Idle::default().request_readings(now);
        match self.drive(session, &mut NoOperator)? {
            Outcome::Readings(readings) => Ok(readings),
            outcome => UnexpectedOutcomeSnafu {
                mode: Mode::Readings,
                outcome,
            }
            .fail(),
        }
    }

    /// Fetch the enable flags and let `operator` toggle and save them.
    pub fn configure<O: Operator + ?Sized>(&mut self, operator: &mut O) -> Result<Outcome, Error> {
        let session = Idle::default().request_config();
        self.drive(session, operator)
    }

    /// Fetch the calibration table and let `operator` edit and save it.
    pub fn calibrate<O: Operator + ?Sized>(&mut self, operator: &mut O) -> Result<Outcome, Error> {
        let session = Idle::default().request_calibration();
        self.drive(session, operator)
    }

    /// Run one top-level command. Reading requests are stamped with the
    /// local wall clock time.
    pub fn run<O: Operator + ?Sized>(
        &mut self,
        mode: Mode,
        operator: &mut O,
    ) -> Result<Outcome, Error> {
        match mode {
            Mode::Readings => self
                .request_readings(chrono::Local::now().time())
                .map(Outcome::Readings),
            Mode::Config => self.configure(operator),
            Mode::Calibration => self.calibrate(operator),
        }
    }

    fn drive<O: Operator + ?Sized>(
        &mut self,
        mut session: Session,
        operator: &mut O,
    ) -> Result<Outcome, Error> {
        let mode = session.mode();
        let Self {
            transport,
            wake,
            clock,
            timing,
        } = self;
        let (clock, timing) = (&*clock, &*timing);
        let _wake = WakeGuard::new(wake);
        let mut link = Link {
            transport,
            clock,
            timing,
        };
        link.transport.flush_input().context(IoSnafu)?;
        let timeout = timing.exchange_timeout;
        let deadline = clock.now() + timeout;

        loop {
            session = match session {
                Session::Idle(idle) => {
                    let result = idle.into_result().unwrap_or(Ok(Outcome::Cancelled));
                    match (&mode, &result) {
                        (Some(mode), Ok(outcome)) => log::info!("{} finished: {:?}", mode, outcome),
                        (Some(mode), Err(e)) => log::warn!("{} failed: {}", mode, e),
                        _ => {}
                    }
                    return result;
                }
                Session::Fetching(fetch) => {
                    let request = fetch.request().to_line();
                    match link.send_until(&request, deadline, timeout, nom_parser::is_payload) {
                        Ok(line) => match link.transport.write_line(RECEIVED_LINE) {
                            Ok(()) => fetch.receive(&line),
                            Err(source) => fetch.fail(Error::Io { source }),
                        },
                        Err(e) => fetch.fail(e),
                    }
                }
                Session::Editing(edit) if clock.now() >= deadline => {
                    log::warn!("{} editing not finished within {:?}", edit.mode(), timeout);
                    edit.expire(Error::Timeout { timeout })
                }
                Session::Editing(edit) => {
                    let decision = operator.decide(edit.view(), edit.rejected());
                    edit.decide(decision)
                }
                Session::Committing(commit) => {
                    match link.commit(commit.payload(), timing.commit_timeout) {
                        Ok(()) => commit.acknowledged(),
                        Err(e) => commit.fail(e),
                    }
                }
                Session::Cancelling(cancel) => {
                    let line = cancel.request().to_line();
                    log::debug!("-> {}", line);
                    match link.transport.write_line(&line) {
                        Ok(()) => cancel.sent(),
                        Err(source) => cancel.fail(Error::Io { source }),
                    }
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_notice() {
        let start = Instant::now();
        let mut notice = BusyNotice::new(Duration::from_secs(3));
        assert!(notice.should_report(start));
        assert!(!notice.should_report(start + Duration::from_secs(1)));
        assert!(!notice.should_report(start + Duration::from_millis(2999)));
        assert!(notice.should_report(start + Duration::from_secs(3)));
        assert!(!notice.should_report(start + Duration::from_secs(5)));
        assert!(notice.should_report(start + Duration::from_secs(7)));
    }

    #[test]
    fn test_timing() {
        let t = Timing::default();
        assert_eq!(t.exchange_timeout, Duration::from_secs(60));
        assert_eq!(t.commit_interval, Duration::from_secs(3));
        let t = t
            .with_exchange_timeout(Duration::from_secs(5))
            .with_commit_timeout(Duration::from_secs(2))
            .with_read_timeout(Duration::from_millis(10));
        assert_eq!(t.exchange_timeout, Duration::from_secs(5));
        assert_eq!(t.commit_timeout, Duration::from_secs(2));
        assert_eq!(t.read_timeout, Duration::from_millis(10));
        assert_eq!(t.busy_notice_interval, Duration::from_secs(3));
    }
}
