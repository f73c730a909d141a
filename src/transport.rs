//! Blocking bulk transport.
//!
//! The FEL layers only ever need two blocking bulk calls and a way to give the interface back to
//! the system. Abstracting them lets the framing and chunking logic run against a scripted device
//! in tests.

use std::time::Duration;

use libusb::DeviceHandle;
use log::{debug, warn};

/// USB interface used by the FEL protocol.
pub const FEL_INTERFACE: u8 = 0;

/// A claimed USB interface able to perform blocking bulk transfers.
pub trait BulkTransport {
    /// Writes `data` to the OUT `endpoint`, returning the number of bytes actually sent.
    fn write_bulk(&self, endpoint: u8, data: &[u8], timeout: Duration) -> libusb::Result<usize>;

    /// Reads into `data` from the IN `endpoint`, returning the number of bytes actually received.
    fn read_bulk(&self, endpoint: u8, data: &mut [u8], timeout: Duration)
                 -> libusb::Result<usize>;

    /// Releases the FEL interface and, if `reattach` is set, rebinds the kernel driver that was
    /// detached to claim it.
    fn release(&mut self, reattach: bool) -> libusb::Result<()>;
}

impl<'c> BulkTransport for DeviceHandle<'c> {
    fn write_bulk(&self, endpoint: u8, data: &[u8], timeout: Duration) -> libusb::Result<usize> {
        DeviceHandle::write_bulk(self, endpoint, data, timeout)
    }

    fn read_bulk(&self, endpoint: u8, data: &mut [u8], timeout: Duration)
                 -> libusb::Result<usize> {
        DeviceHandle::read_bulk(self, endpoint, data, timeout)
    }

    fn release(&mut self, reattach: bool) -> libusb::Result<()> {
        let released = self.release_interface(FEL_INTERFACE);
        if let Err(ref e) = released {
            warn!("error releasing device handle interface: {:?} ({})", e, e);
        }
        if cfg!(target_os = "linux") && reattach {
            debug!("reattaching kernel driver to interface {}", FEL_INTERFACE);
            self.attach_kernel_driver(FEL_INTERFACE)?;
        }
        released
    }
}
