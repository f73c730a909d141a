//! Scripted USB transport for unit testing.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use crate::transport::BulkTransport;

/// A single bulk call seen by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Data sent to an OUT endpoint.
    Out(u8, Vec<u8>),
    /// Data received from an IN endpoint.
    In(u8, Vec<u8>),
}

#[derive(Default)]
struct Inner {
    events: RefCell<Vec<Event>>,
    read_stream: RefCell<VecDeque<u8>>,
    timeouts: RefCell<Vec<Duration>>,
    calls: Cell<usize>,
    fail: RefCell<Option<(usize, libusb::Error)>>,
    limit: Cell<Option<usize>>,
    released: Cell<Option<bool>>,
}

/// Mock transport: records OUT transfers and serves queued IN data as a byte stream.
///
/// Clones share their state, so a test can keep one clone while a session owns another.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Rc<Inner>,
}

impl MockTransport {
    pub fn new() -> MockTransport {
        MockTransport::default()
    }

    /// Appends bytes the device will return on subsequent reads.
    pub fn queue_read(&self, data: &[u8]) {
        self.inner.read_stream.borrow_mut().extend(data.iter().cloned());
    }

    /// Queues a valid 13-byte `AWUS` acknowledgement.
    pub fn queue_ack(&self) {
        let mut ack = [0u8; 13];
        ack[..4].copy_from_slice(b"AWUS");
        self.queue_read(&ack);
    }

    /// Makes the `n`-th bulk call (1-based, both directions) fail with `error`.
    pub fn fail_call(&self, n: usize, error: libusb::Error) {
        *self.inner.fail.borrow_mut() = Some((n, error));
    }

    /// Caps the number of bytes moved by every bulk call.
    pub fn limit_transfers(&self, max: usize) {
        self.inner.limit.set(Some(max));
    }

    pub fn events(&self) -> Vec<Event> {
        self.inner.events.borrow().clone()
    }

    /// All OUT transfers, as `(endpoint, data)`.
    pub fn writes(&self) -> Vec<(u8, Vec<u8>)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Out(ep, data) => Some((ep, data)),
                Event::In(..) => None,
            })
            .collect()
    }

    pub fn read_calls(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| match e {
                Event::In(..) => true,
                Event::Out(..) => false,
            })
            .count()
    }

    pub fn timeouts(&self) -> Vec<Duration> {
        self.inner.timeouts.borrow().clone()
    }

    /// Bytes still queued for reading.
    pub fn pending_reads(&self) -> usize {
        self.inner.read_stream.borrow().len()
    }

    /// `Some(reattach)` once the interface has been released.
    pub fn released(&self) -> Option<bool> {
        self.inner.released.get()
    }

    fn begin_call(&self, timeout: Duration) -> libusb::Result<()> {
        let call = self.inner.calls.get() + 1;
        self.inner.calls.set(call);
        self.inner.timeouts.borrow_mut().push(timeout);
        let failing = match *self.inner.fail.borrow() {
            Some((n, _)) => n == call,
            None => false,
        };
        if failing {
            if let Some((_, error)) = self.inner.fail.borrow_mut().take() {
                return Err(error);
            }
        }
        Ok(())
    }

    fn cap(&self, len: usize) -> usize {
        self.inner.limit.get().map_or(len, |max| len.min(max))
    }
}

impl BulkTransport for MockTransport {
    fn write_bulk(&self, endpoint: u8, data: &[u8], timeout: Duration) -> libusb::Result<usize> {
        self.begin_call(timeout)?;
        let n = self.cap(data.len());
        self.inner.events.borrow_mut().push(Event::Out(endpoint, data[..n].to_vec()));
        Ok(n)
    }

    fn read_bulk(&self, endpoint: u8, data: &mut [u8], timeout: Duration)
                 -> libusb::Result<usize> {
        self.begin_call(timeout)?;
        let mut stream = self.inner.read_stream.borrow_mut();
        if stream.is_empty() {
            return Err(libusb::Error::Timeout);
        }
        let n = self.cap(data.len()).min(stream.len());
        for (dst, src) in data.iter_mut().zip(stream.drain(..n)) {
            *dst = src;
        }
        self.inner.events.borrow_mut().push(Event::In(endpoint, data[..n].to_vec()));
        Ok(n)
    }

    fn release(&mut self, reattach: bool) -> libusb::Result<()> {
        self.inner.released.set(Some(reattach));
        Ok(())
    }
}
