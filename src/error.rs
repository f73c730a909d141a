//! FEL errors.

use failure::Fail;
use log::error;

/// Result type used across the crate.
pub type Result<T> = ::std::result::Result<T, FelError>;

/// FEL transport errors.
///
/// Every variant that originates in the USB stack keeps the step that failed and the underlying
/// `libusb` error as its cause.
#[derive(Debug, Fail)]
pub enum FelError {
    /// The USB context could not be created.
    #[fail(display = "unable to initialise libUSB: {}", _0)]
    UsbInit(#[cause] libusb::Error),
    /// No device with the requested identifiers (or at the requested bus/address) is attached.
    #[fail(display = "Allwinner USB FEL device not found: {}", what)]
    DeviceNotFound {
        /// Description of what was looked up.
        what: String,
    },
    /// The device exists but could not be opened.
    #[fail(display = "you don't have permission to access the Allwinner USB FEL device \
                      (bus {:03}, device {:03}): {}", bus, address, cause)]
    PermissionDenied {
        /// Bus number of the device.
        bus: u8,
        /// Device address on the bus.
        address: u8,
        /// Transport error.
        #[cause]
        cause: libusb::Error,
    },
    /// The device was found but opening it failed for a reason other than permissions.
    #[fail(display = "unable to open bus {:03} device {:03}: {}", bus, address, cause)]
    OpenFailed {
        /// Bus number of the device.
        bus: u8,
        /// Device address on the bus.
        address: u8,
        /// Transport error.
        #[cause]
        cause: libusb::Error,
    },
    /// The device at the pinned bus/address is not the expected FEL device.
    #[fail(display = "bus {:03} device {:03} is not a FEL device (expected {:04x}:{:04x}, got \
                      {:04x}:{:04x})", bus, address, expected_vendor, expected_product,
           vendor, product)]
    DeviceMismatch {
        /// Pinned bus number.
        bus: u8,
        /// Pinned device address.
        address: u8,
        /// Expected vendor ID.
        expected_vendor: u16,
        /// Expected product ID.
        expected_product: u16,
        /// Vendor ID reported by the device.
        vendor: u16,
        /// Product ID reported by the device.
        product: u16,
    },
    /// The FEL interface could not be claimed, even after detaching the kernel driver.
    #[fail(display = "unable to claim device interface ({}): {}", step, cause)]
    ClaimFailed {
        /// Failing step.
        step: &'static str,
        /// Transport error.
        #[cause]
        cause: libusb::Error,
    },
    /// No usable bulk endpoints were found on the claimed interface.
    #[fail(display = "FAILED to get FEL mode endpoint addresses: {}", reason)]
    EndpointNotFound {
        /// Why discovery failed.
        reason: String,
        /// Transport error, if descriptor inspection itself failed.
        cause: Option<libusb::Error>,
    },
    /// A bulk transfer failed or timed out.
    #[fail(display = "{}() failed after {} bytes: {}", step, transferred, cause)]
    TransferFailed {
        /// Failing step.
        step: &'static str,
        /// Bytes moved before the failure.
        transferred: usize,
        /// Transport error.
        #[cause]
        cause: libusb::Error,
    },
    /// The device did not acknowledge with `AWUS`.
    #[fail(display = "USB response signature mismatch: expected 'AWUS', found '{}'", found)]
    ProtocolDesync {
        /// The first bytes of the received acknowledgement.
        found: String,
    },
    /// An earlier transfer error left the session in an unknown protocol state.
    #[fail(display = "FEL session is unusable after an earlier transfer error, reopen it")]
    SessionPoisoned,
    /// The requested range does not fit in the 32-bit address space, or its length does not fit
    /// in the 32-bit length fields.
    #[fail(display = "cannot access above 0xffffffff: offset {:#010x}, length {:#010x}",
           offset, length)]
    AddressOverflow {
        /// Start address.
        offset: u32,
        /// Requested length.
        length: usize,
    },
}

impl FelError {
    /// Whether this error happened while setting up the session.
    pub fn is_setup_fault(&self) -> bool {
        match *self {
            FelError::UsbInit(_)
            | FelError::DeviceNotFound { .. }
            | FelError::PermissionDenied { .. }
            | FelError::OpenFailed { .. }
            | FelError::DeviceMismatch { .. }
            | FelError::ClaimFailed { .. }
            | FelError::EndpointNotFound { .. } => true,
            _ => false,
        }
    }

    /// Whether the session (or the open attempt) is unusable after this error.
    ///
    /// Only argument validation errors leave the session intact, since they are raised before
    /// anything is sent to the device.
    pub fn is_fatal(&self) -> bool {
        match *self {
            FelError::AddressOverflow { .. } => false,
            _ => true,
        }
    }

    /// The underlying `libusb` error, if any.
    pub fn usb_error(&self) -> Option<&libusb::Error> {
        match *self {
            FelError::UsbInit(ref e)
            | FelError::PermissionDenied { cause: ref e, .. }
            | FelError::OpenFailed { cause: ref e, .. }
            | FelError::ClaimFailed { cause: ref e, .. }
            | FelError::TransferFailed { cause: ref e, .. } => Some(e),
            FelError::EndpointNotFound { ref cause, .. } => cause.as_ref(),
            _ => None,
        }
    }

    /// Numeric `libusb` error code of the underlying transport error, if any.
    pub fn usb_error_code(&self) -> Option<i32> {
        self.usb_error().map(libusb_error_code)
    }
}

/// Maps a `libusb` error to its `LIBUSB_ERROR_*` code.
pub fn libusb_error_code(error: &libusb::Error) -> i32 {
    use libusb::Error::*;

    match *error {
        Io => -1,
        InvalidParam => -2,
        Access => -3,
        NoDevice => -4,
        NotFound => -5,
        Busy => -6,
        Timeout => -7,
        Overflow => -8,
        Pipe => -9,
        Interrupted => -10,
        NoMem => -11,
        NotSupported => -12,
        _ => -99,
    }
}

/// Logs a diagnostic for the given error and returns whether it is fatal.
pub fn report(err: &FelError) -> bool {
    let fatal = err.is_fatal();
    match err.usb_error_code() {
        Some(code) => error!("{} (ERROR {}{})",
                             err,
                             code,
                             if fatal { ", fatal" } else { "" }),
        None => error!("{}{}", err, if fatal { " (fatal)" } else { "" }),
    }
    fatal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_faults_are_classified() {
        let err = FelError::DeviceMismatch {
            bus: 1,
            address: 4,
            expected_vendor: 0x1f3a,
            expected_product: 0xefe8,
            vendor: 0x0403,
            product: 0x6001,
        };
        assert!(err.is_setup_fault());
        assert!(err.is_fatal());
        assert_eq!(err.usb_error_code(), None);
        assert_eq!(err.to_string(),
                   "bus 001 device 004 is not a FEL device (expected 1f3a:efe8, got 0403:6001)");
    }

    #[test]
    fn transfer_errors_carry_the_usb_code() {
        let err = FelError::TransferFailed {
            step: "usb_bulk_send",
            transferred: 4096,
            cause: libusb::Error::Timeout,
        };
        assert!(!err.is_setup_fault());
        assert!(err.is_fatal());
        assert_eq!(err.usb_error_code(), Some(-7));
        assert!(err.to_string().starts_with("usb_bulk_send() failed after 4096 bytes"));
        assert!(report(&err));
    }

    #[test]
    fn poisoned_session_is_fatal() {
        let err = FelError::SessionPoisoned;
        assert!(err.is_fatal());
        assert!(!err.is_setup_fault());
        assert_eq!(err.usb_error_code(), None);
    }

    #[test]
    fn address_overflow_is_not_fatal() {
        let err = FelError::AddressOverflow {
            offset: 0xffff_ff00,
            length: 0x200,
        };
        assert!(!err.is_fatal());
        assert!(!err.is_setup_fault());
        assert!(!report(&err));
    }
}
