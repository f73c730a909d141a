//! Allwinner FEL USB transport.
//!
//! Allwinner *SoCs* in FEL mode expose a tiny boot-ROM protocol over USB bulk transfers. This
//! crate implements its client side:
//!
//! * [`Session`] opens and claims the device and finds its bulk endpoints.
//! * Every transfer is framed by a 32-byte `AWUC` request and acknowledged by a 13-byte `AWUS`
//!   response ([`envelope`]).
//! * Payloads are split in bounded chunks so that no single bulk call exceeds its timeout
//!   ([`chunk`]).
//! * The FEL commands (version, read, write, execute) are built on top of that ([`fel`]).
//!
//! ```no_run
//! use aw_fel_usb::{Fel, OpenOptions};
//!
//! # fn main() -> Result<(), aw_fel_usb::FelError> {
//! let fel = Fel::new()?;
//! let mut session = fel.open(&OpenOptions::new())?;
//! let version = session.get_version()?;
//! println!("{}", version);
//! let sram = session.read_memory(u32::from(version.scratchpad()), 0x100)?;
//! session.write_memory(0x2000, &sram)?;
//! session.execute(0x2000)?;
//! session.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! [`Session`]: session/struct.Session.html
//! [`envelope`]: envelope/index.html
//! [`chunk`]: chunk/index.html
//! [`fel`]: fel/index.html

#![warn(missing_docs, trivial_casts, trivial_numeric_casts, unused_extern_crates,
    unused_import_braces, unused_qualifications)]

pub mod chunk;
pub mod envelope;
pub mod error;
pub mod fel;
pub mod session;
pub mod soc;
pub mod transport;

#[cfg(test)]
mod mock;

use libusb::DeviceHandle;
use log::debug;

pub use chunk::TransferConfig;
pub use error::{report, FelError, Result};
pub use fel::{FelStatus, VersionInfo};
pub use session::{OpenOptions, Session};
pub use transport::BulkTransport;

/// Allwinner FEL device USB vendor ID.
pub const AW_VENDOR_ID: u16 = 0x1f3a;
/// Allwinner FEL device USB product ID.
pub const AW_PRODUCT_ID: u16 = 0xefe8;

/// Session on a real USB device.
pub type UsbSession<'c> = Session<DeviceHandle<'c>>;

/// Allwinner FEL devices context.
///
/// Creating it initialises libUSB; dropping it shuts libUSB down, so every session opened from
/// it must be closed first (the borrow checker enforces it).
pub struct Fel {
    pub(crate) context: libusb::Context,
}

impl Fel {
    /// Creates a new Fel object.
    pub fn new() -> Result<Fel> {
        let context = libusb::Context::new().map_err(FelError::UsbInit)?;
        debug!("libUSB context initialised");
        Ok(Fel { context })
    }

    /// Opens a FEL session on the device selected by `options`.
    pub fn open(&self, options: &OpenOptions) -> Result<UsbSession> {
        Session::open(self, options)
    }

    /// Lists the `(bus, address)` of every attached device with the given identifiers, without
    /// opening them.
    pub fn list_devices(&self, vendor_id: u16, product_id: u16) -> Result<Vec<(u8, u8)>> {
        let mut result = Vec::new();
        for device in self.context.devices().map_err(FelError::UsbInit)?.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(d) => d,
                Err(_) => continue,
            };
            if descriptor.vendor_id() == vendor_id && descriptor.product_id() == product_id {
                result.push((device.bus_number(), device.address()));
            }
        }
        Ok(result)
    }
}
