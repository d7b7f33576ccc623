#![allow(dead_code)]

pub mod sync;

use std::cell::Cell;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::io::{Error, ErrorKind};
use std::rc::Rc;
use std::time::{Duration, Instant};

use sensorlink_proto::session::View;
use sensorlink_proto::{Clock, Decision, Operator, Transport, ValidationError, WakeSignal};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Clock that only moves when the engine sleeps or a scripted read waits.
/// Clones share the same time.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    offset: Rc<Cell<Duration>>,
}

impl MockClock {
    pub fn new() -> MockClock {
        MockClock {
            start: Instant::now(),
            offset: Rc::new(Cell::new(Duration::ZERO)),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.offset.get()
    }

    pub fn advance(&self, duration: Duration) {
        self.offset.set(self.offset.get() + duration);
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.offset.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration)
    }
}

/// Transport playing back the peer's side of a conversation.
///
/// Every `read_line` consumes one scripted reply. A line reply takes
/// `latency` (capped by the read timeout), silence or an exhausted script
/// waits out the whole timeout.
pub struct ScriptedTransport {
    clock: MockClock,
    script: VecDeque<Option<String>>,
    latency: Duration,
    sent: Vec<(Duration, String)>,
    flushes: usize,
    pub do_write_error: bool,
}

impl ScriptedTransport {
    pub fn new(clock: &MockClock) -> ScriptedTransport {
        ScriptedTransport {
            clock: clock.clone(),
            script: VecDeque::new(),
            latency: Duration::from_secs(1),
            sent: Vec::new(),
            flushes: 0,
            do_write_error: false,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> ScriptedTransport {
        self.latency = latency;
        self
    }

    pub fn reply(&mut self, line: &str) -> &mut ScriptedTransport {
        self.script.push_back(Some(line.to_owned()));
        self
    }

    pub fn replies(&mut self, line: &str, count: usize) -> &mut ScriptedTransport {
        for _ in 0..count {
            self.reply(line);
        }
        self
    }

    pub fn silence(&mut self) -> &mut ScriptedTransport {
        self.script.push_back(None);
        self
    }

    /// Lines written by the host, with the time they were written at.
    pub fn sent(&self) -> &[(Duration, String)] {
        &self.sent
    }

    pub fn sent_lines(&self) -> Vec<&str> {
        self.sent.iter().map(|(_, line)| line.as_str()).collect()
    }

    pub fn flushes(&self) -> usize {
        self.flushes
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl Transport for ScriptedTransport {
    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        if self.do_write_error {
            return Err(Error::new(ErrorKind::PermissionDenied, "IO write error"));
        }
        self.sent.push((self.clock.elapsed(), line.to_owned()));
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> std::io::Result<Option<String>> {
        match self.script.pop_front().flatten() {
            Some(line) => {
                self.clock.advance(self.latency.min(timeout));
                Ok(Some(line))
            }
            None => {
                self.clock.advance(timeout);
                Ok(None)
            }
        }
    }

    fn flush_input(&mut self) -> std::io::Result<()> {
        self.flushes += 1;
        Ok(())
    }
}

/// Wake line that remembers every level it was driven to.
#[derive(Debug, Default)]
pub struct RecordingWake {
    pub levels: Vec<bool>,
}

impl RecordingWake {
    pub fn is_high(&self) -> bool {
        self.levels.last().copied().unwrap_or(false)
    }
}

impl WakeSignal for RecordingWake {
    type Error = Infallible;

    fn assert_wake(&mut self) -> Result<(), Infallible> {
        self.levels.push(true);
        Ok(())
    }

    fn release_wake(&mut self) -> Result<(), Infallible> {
        self.levels.push(false);
        Ok(())
    }
}

/// Operator replaying a fixed list of decisions, cancelling once it runs out.
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    decisions: VecDeque<Decision>,
    pub prompts: usize,
    pub rejections: Vec<String>,
}

impl ScriptedOperator {
    pub fn new(decisions: &[Decision]) -> ScriptedOperator {
        ScriptedOperator {
            decisions: decisions.iter().copied().collect(),
            ..Default::default()
        }
    }
}

impl Operator for ScriptedOperator {
    fn decide(&mut self, _view: View<'_>, rejected: Option<&ValidationError>) -> Decision {
        self.prompts += 1;
        if let Some(e) = rejected {
            self.rejections.push(e.to_string());
        }
        self.decisions.pop_front().unwrap_or(Decision::Cancel)
    }
}

/// Operator that takes its time, e.g. a user walking away from the prompt.
pub struct SlowOperator {
    pub clock: MockClock,
    pub delay: Duration,
}

impl Operator for SlowOperator {
    fn decide(&mut self, _view: View<'_>, _rejected: Option<&ValidationError>) -> Decision {
        self.clock.advance(self.delay);
        Decision::Select(1)
    }
}
