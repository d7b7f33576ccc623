//! Line oriented access to the serial link, and the clock the protocol
//! deadlines are measured with.

use std::io::{self, ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use crate::buffer::LineBuffer;

// Back-off when the underlying reader reports end of stream.
const IDLE_POLL: Duration = Duration::from_millis(10);

/// A newline framed, half-duplex text channel to the peer.
pub trait Transport {
    /// Send one line. The terminator is appended by the transport.
    fn write_line(&mut self, line: &str) -> io::Result<()>;

    /// Wait up to `timeout` for the next complete line, terminator stripped.
    /// Returns `Ok(None)` if nothing arrived in time.
    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>>;

    /// Drop everything received so far that hasn't been read yet.
    fn flush_input(&mut self) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        (**self).write_line(line)
    }

    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        (**self).read_line(timeout)
    }

    fn flush_input(&mut self) -> io::Result<()> {
        (**self).flush_input()
    }
}

/// Time source for protocol deadlines.
pub trait Clock {
    fn now(&self) -> Instant;

    fn sleep(&self, duration: Duration);
}

/// The wall clock, sleeping the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration)
    }
}

/// [`Transport`] over any byte stream.
///
/// Reads are expected to block for a short time at most; `TimedOut`,
/// `WouldBlock` and `Interrupted` errors from the stream count as "no data yet".
/// Blank lines are skipped.
#[derive(Debug)]
pub struct LineTransport<IO> {
    io: IO,
    buffer: LineBuffer,
}

impl<IO: Read + Write> LineTransport<IO> {
    pub fn new(io: IO) -> Self {
        Self {
            io,
            buffer: LineBuffer::new(),
        }
    }

    pub fn get_ref(&self) -> &IO {
        &self.io
    }

    pub fn get_mut(&mut self) -> &mut IO {
        &mut self.io
    }

    pub fn into_inner(self) -> IO {
        self.io
    }
}

impl<IO: Read + Write> Transport for LineTransport<IO> {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.io.write_all(line.as_bytes())?;
        self.io.write_all(b"\n")?;
        self.io.flush()
    }

    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0; 64];
        loop {
            while let Some(line) = self.buffer.next_line() {
                if !line.trim().is_empty() {
                    return Ok(Some(line));
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            match self.io.read(&mut chunk) {
                Ok(0) => std::thread::sleep(IDLE_POLL.min(deadline - now)),
                Ok(len) => self.buffer.write(&chunk[..len]),
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(e),
            }
        }
    }

    fn flush_input(&mut self) -> io::Result<()> {
        self.buffer.clear();
        Ok(())
    }
}

/// Serial port backed transport.
#[cfg(feature = "serial")]
pub mod serial {
    use super::*;
    use serialport::{ClearBuffer, SerialPort};

    /// OS level read timeout; [`Transport::read_line`] loops on top of it.
    pub const PORT_TIMEOUT: Duration = Duration::from_millis(100);

    /// Open `path` with the peer's framing (8N1) and wrap it in a transport.
    pub fn open_port(path: &str, baud_rate: u32) -> serialport::Result<SerialTransport> {
        let port = serialport::new(path, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(PORT_TIMEOUT)
            .open()?;
        log::info!("Opened {} at {} baud", path, baud_rate);
        Ok(SerialTransport::new(port))
    }

    /// [`LineTransport`] over a serial port, also clearing the OS input queue
    /// on [`flush_input`](Transport::flush_input).
    pub struct SerialTransport {
        inner: LineTransport<Box<dyn SerialPort>>,
    }

    impl SerialTransport {
        pub fn new(port: Box<dyn SerialPort>) -> Self {
            Self {
                inner: LineTransport::new(port),
            }
        }

        /// A second handle to the port, e.g. for driving the DTR line.
        pub fn try_clone_port(&self) -> serialport::Result<Box<dyn SerialPort>> {
            self.inner.get_ref().try_clone()
        }
    }

    impl std::fmt::Debug for SerialTransport {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("SerialTransport")
                .field("port", &self.inner.get_ref().name())
                .finish()
        }
    }

    impl Transport for SerialTransport {
        fn write_line(&mut self, line: &str) -> io::Result<()> {
            self.inner.write_line(line)
        }

        fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>> {
            self.inner.read_line(timeout)
        }

        fn flush_input(&mut self) -> io::Result<()> {
            self.inner.get_mut().clear(ClearBuffer::Input)?;
            self.inner.flush_input()
        }
    }
}
