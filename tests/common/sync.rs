use std::collections::VecDeque;
use std::io::{Error, ErrorKind};
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

type RxT = Mutex<VecDeque<u8>>;

/// In-memory point-to-point serial link between a host and a peer thread.
#[derive(Default)]
pub struct SerialLink {
    host_rx: RxT,
    node_rx: RxT,
    host_data_available: Condvar,
    node_data_available: Condvar,
    eof: AtomicBool,
}

impl SerialLink {
    pub fn new() -> Arc<SerialLink> {
        Default::default()
    }

    /// Make blocked readers on both ends return end of stream.
    pub fn disconnect(&self) {
        self.eof.store(true, SeqCst);
        self.node_data_available.notify_all();
        self.host_data_available.notify_all();
    }

    pub fn host_end(self: &Arc<Self>) -> LinkEnd {
        LinkEnd::new(Arc::clone(self), true)
    }

    pub fn node_end(self: &Arc<Self>) -> LinkEnd {
        LinkEnd::new(Arc::clone(self), false)
    }

    fn queues(&self, is_host: bool) -> (&RxT, &Condvar, &RxT, &Condvar) {
        if is_host {
            (
                &self.host_rx,
                &self.host_data_available,
                &self.node_rx,
                &self.node_data_available,
            )
        } else {
            (
                &self.node_rx,
                &self.node_data_available,
                &self.host_rx,
                &self.host_data_available,
            )
        }
    }
}

pub struct LinkEnd {
    link: Arc<SerialLink>,
    is_host: bool,
    pub timeout: Duration,
    pub do_read_error: bool,
    pub do_write_error: bool,
}

impl LinkEnd {
    fn new(link: Arc<SerialLink>, is_host: bool) -> LinkEnd {
        LinkEnd {
            link,
            is_host,
            timeout: Duration::from_millis(20),
            do_read_error: false,
            do_write_error: false,
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.link.eof.load(SeqCst)
    }
}

impl std::io::Read for LinkEnd {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            panic!("Testsuite called read with zero length buffer.")
        }
        if self.do_read_error {
            self.do_read_error = false;
            return Err(Error::new(ErrorKind::PermissionDenied, "IO read error"));
        }

        let (rx, available, _, _) = self.link.queues(self.is_host);
        let mut rx = rx.lock().expect("Read mutex is poisoned");
        if rx.is_empty() && !self.link.eof.load(SeqCst) {
            rx = available
                .wait_timeout(rx, self.timeout)
                .expect("Mutex lock failed")
                .0;
        }
        let len = buf.len().min(rx.len());
        if len > 0 {
            for (slot, byte) in buf.iter_mut().zip(rx.drain(..len)) {
                *slot = byte;
            }
            Ok(len)
        } else if self.link.eof.load(SeqCst) {
            Ok(0)
        } else {
            Err(Error::new(ErrorKind::TimedOut, "IO read timeout"))
        }
    }
}

impl std::io::Write for LinkEnd {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.do_write_error {
            self.do_write_error = false;
            return Err(Error::new(ErrorKind::PermissionDenied, "IO write error"));
        }
        let (_, _, tx, available) = self.link.queues(self.is_host);
        tx.lock().expect("Write mutex is poisoned").extend(buf);
        available.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
