//! USB session management.

use std::time::Duration;

use libusb::{Device, DeviceHandle};
use log::{debug, warn};

use crate::chunk::{TransferConfig, USB_TIMEOUT};
use crate::error::{FelError, Result};
use crate::fel::FelStatus;
use crate::transport::{BulkTransport, FEL_INTERFACE};
use crate::{Fel, AW_PRODUCT_ID, AW_VENDOR_ID};

/// How to select the FEL device to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    /// USB vendor ID of the device.
    pub vendor_id: u16,
    /// USB product ID of the device.
    pub product_id: u16,
    /// Bus number, if a specific device is wanted.
    pub bus: Option<u8>,
    /// Device address on the bus, if a specific device is wanted.
    pub address: Option<u8>,
    /// Timeout of every bulk call of the session.
    pub timeout: Duration,
}

impl OpenOptions {
    /// Default options: first Allwinner FEL device, 10 second timeout.
    pub fn new() -> OpenOptions {
        OpenOptions::default()
    }

    /// Overrides the USB identifiers.
    pub fn vendor_product(mut self, vendor_id: u16, product_id: u16) -> OpenOptions {
        self.vendor_id = vendor_id;
        self.product_id = product_id;
        self
    }

    /// Pins the device to the given bus number and device address.
    pub fn bus_address(mut self, bus: u8, address: u8) -> OpenOptions {
        self.bus = Some(bus);
        self.address = Some(address);
        self
    }

    /// Overrides the transfer timeout.
    pub fn timeout(mut self, timeout: Duration) -> OpenOptions {
        self.timeout = timeout;
        self
    }

    /// Pinned `(bus, address)`, only if both are given.
    fn location(&self) -> Option<(u8, u8)> {
        match (self.bus, self.address) {
            (Some(bus), Some(address)) => Some((bus, address)),
            _ => None,
        }
    }
}

impl Default for OpenOptions {
    fn default() -> OpenOptions {
        OpenOptions {
            vendor_id: AW_VENDOR_ID,
            product_id: AW_PRODUCT_ID,
            bus: None,
            address: None,
            timeout: Duration::from_secs(USB_TIMEOUT),
        }
    }
}

/// An open FEL session.
///
/// The session exclusively owns the claimed interface. Dropping it releases the interface and,
/// if the kernel driver had to be detached to claim it, reattaches the driver before the device
/// handle is closed.
pub struct Session<T: BulkTransport> {
    transport: T,
    endpoint_in: u8,
    endpoint_out: u8,
    iface_detached: bool,
    released: bool,
    poisoned: bool,
    config: TransferConfig,
    pub(crate) last_status: Option<FelStatus>,
}

impl<'c> Session<DeviceHandle<'c>> {
    /// Opens the FEL device selected by `options`, claims its interface and discovers its bulk
    /// endpoints.
    ///
    /// If no bus/address is pinned, the first device matching the vendor/product IDs is used.
    /// Otherwise the device at that location must carry the expected IDs.
    pub fn open(fel: &'c Fel, options: &OpenOptions) -> Result<Session<DeviceHandle<'c>>> {
        let device = find_device(fel, options)?;
        let (bus, address) = (device.bus_number(), device.address());
        let mut handle = device.open().map_err(|e| match e {
            libusb::Error::Access => FelError::PermissionDenied { bus, address, cause: e },
            libusb::Error::NoDevice | libusb::Error::NotFound => FelError::DeviceNotFound {
                what: format!("bus {:03} device {:03} disappeared", bus, address),
            },
            e => FelError::OpenFailed { bus, address, cause: e },
        })?;
        debug!("opened FEL device on bus {:03} device {:03}", bus, address);

        let iface_detached = claim(&mut handle, cfg!(target_os = "linux"))?;
        let mut session = Session {
            transport: handle,
            endpoint_in: 0,
            endpoint_out: 0,
            iface_detached,
            released: false,
            poisoned: false,
            config: TransferConfig::with_timeout(options.timeout),
            last_status: None,
        };
        // From here on, `Drop` gives the interface back if anything fails.
        let (endpoint_in, endpoint_out) = device_endpoints(&device)?;
        session.endpoint_in = endpoint_in;
        session.endpoint_out = endpoint_out;
        Ok(session)
    }
}

impl<T: BulkTransport> Session<T> {
    /// Wraps an already claimed transport with known endpoints.
    pub fn from_transport(transport: T,
                          endpoint_in: u8,
                          endpoint_out: u8,
                          config: TransferConfig)
                          -> Result<Session<T>> {
        let mut session = Session {
            transport,
            endpoint_in: 0,
            endpoint_out: 0,
            iface_detached: false,
            released: false,
            poisoned: false,
            config,
            last_status: None,
        };
        if endpoint_in == 0 || endpoint_out == 0 {
            return Err(FelError::EndpointNotFound {
                reason: format!("invalid endpoints IN {:#04x} / OUT {:#04x}",
                                endpoint_in,
                                endpoint_out),
                cause: None,
            });
        }
        session.endpoint_in = endpoint_in;
        session.endpoint_out = endpoint_out;
        Ok(session)
    }

    /// Bulk IN endpoint address.
    pub fn endpoint_in(&self) -> u8 {
        self.endpoint_in
    }

    /// Bulk OUT endpoint address.
    pub fn endpoint_out(&self) -> u8 {
        self.endpoint_out
    }

    /// Whether the kernel driver was detached to claim the interface.
    pub fn iface_detached(&self) -> bool {
        self.iface_detached
    }

    /// Transfer timeout and chunk sizes.
    pub fn transfer_config(&self) -> &TransferConfig {
        &self.config
    }

    /// Whether an earlier transfer error left the session unusable.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub(crate) fn transport(&self) -> &T {
        &self.transport
    }

    /// Fails if an earlier transfer error left the session unusable.
    pub(crate) fn check_usable(&self) -> Result<()> {
        if self.poisoned {
            Err(FelError::SessionPoisoned)
        } else {
            Ok(())
        }
    }

    /// Marks the session unusable if `result` is a fatal error.
    pub(crate) fn poison_on_error<R>(&mut self, result: Result<R>) -> Result<R> {
        if let Err(ref e) = result {
            if e.is_fatal() {
                warn!("FEL session unusable after: {}", e);
                self.poisoned = true;
            }
        }
        result
    }

    /// Closes the session, reporting teardown errors instead of only logging them.
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        debug!("releasing FEL interface{}",
               if self.iface_detached { " and reattaching kernel driver" } else { "" });
        self.transport
            .release(self.iface_detached)
            .map_err(|cause| {
                FelError::ClaimFailed {
                    step: "release_interface",
                    cause,
                }
            })
    }
}

impl<T: BulkTransport> Drop for Session<T> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("error closing FEL session: {}", e);
        }
    }
}

/// An enumerated USB device, as far as device selection is concerned.
trait DeviceEntry {
    /// `(bus, address)` of the device.
    fn location(&self) -> (u8, u8);
    /// `(vendor, product)` from the device descriptor.
    fn ids(&self) -> libusb::Result<(u16, u16)>;
}

impl<'c> DeviceEntry for Device<'c> {
    fn location(&self) -> (u8, u8) {
        (self.bus_number(), self.address())
    }

    fn ids(&self) -> libusb::Result<(u16, u16)> {
        let descriptor = self.device_descriptor()?;
        Ok((descriptor.vendor_id(), descriptor.product_id()))
    }
}

/// Finds the device selected by the given options.
fn find_device<'c>(fel: &'c Fel, options: &OpenOptions) -> Result<Device<'c>> {
    let devices = fel.context.devices().map_err(FelError::UsbInit)?;
    select_device(devices.iter(), options)
}

/// Picks the device selected by the given options.
///
/// A pinned location never falls back to another device: if the device there has other IDs, it
/// is a mismatch.
fn select_device<D, I>(devices: I, options: &OpenOptions) -> Result<D>
    where D: DeviceEntry,
          I: IntoIterator<Item = D>
{
    match options.location() {
        None => {
            for device in devices {
                let (bus, address) = device.location();
                match device.ids() {
                    Ok((vendor, product)) => {
                        if vendor == options.vendor_id && product == options.product_id {
                            return Ok(device);
                        }
                    }
                    Err(e) => {
                        debug!("skipping device on bus {:03} device {:03}: {}", bus, address, e);
                    }
                }
            }
            Err(FelError::DeviceNotFound {
                what: format!("no device with ID {:04x}:{:04x}",
                              options.vendor_id,
                              options.product_id),
            })
        }
        Some((bus, address)) => {
            for device in devices {
                if device.location() == (bus, address) {
                    let (vendor, product) = device.ids()
                        .map_err(|e| FelError::OpenFailed { bus, address, cause: e })?;
                    check_ids(bus, address, options, vendor, product)?;
                    return Ok(device);
                }
            }
            Err(FelError::DeviceNotFound {
                what: format!("bus {:03} device {:03} not found in libusb device list",
                              bus,
                              address),
            })
        }
    }
}

/// Verifies that a pinned device carries the expected identifiers.
fn check_ids(bus: u8,
             address: u8,
             options: &OpenOptions,
             vendor: u16,
             product: u16)
             -> Result<()> {
    if vendor != options.vendor_id || product != options.product_id {
        return Err(FelError::DeviceMismatch {
            bus,
            address,
            expected_vendor: options.vendor_id,
            expected_product: options.product_id,
            vendor,
            product,
        });
    }
    Ok(())
}

/// Interface claiming operations of an open device.
trait InterfaceClaim {
    fn claim_interface(&mut self, iface: u8) -> libusb::Result<()>;
    fn detach_kernel_driver(&mut self, iface: u8) -> libusb::Result<()>;
    fn attach_kernel_driver(&mut self, iface: u8) -> libusb::Result<()>;
}

impl<'c> InterfaceClaim for DeviceHandle<'c> {
    fn claim_interface(&mut self, iface: u8) -> libusb::Result<()> {
        DeviceHandle::claim_interface(self, iface)
    }

    fn detach_kernel_driver(&mut self, iface: u8) -> libusb::Result<()> {
        DeviceHandle::detach_kernel_driver(self, iface)
    }

    fn attach_kernel_driver(&mut self, iface: u8) -> libusb::Result<()> {
        DeviceHandle::attach_kernel_driver(self, iface)
    }
}

/// Claims the FEL interface. If that fails and `detach_fallback` is set (Linux), the kernel
/// driver is detached and the claim retried once.
///
/// Returns whether the kernel driver was detached.
fn claim<H: InterfaceClaim>(handle: &mut H, detach_fallback: bool) -> Result<bool> {
    let first = match handle.claim_interface(FEL_INTERFACE) {
        Ok(()) => return Ok(false),
        Err(e) => e,
    };
    if !detach_fallback {
        return Err(FelError::ClaimFailed {
            step: "claim_interface",
            cause: first,
        });
    }

    debug!("claiming interface failed ({}), detaching kernel driver", first);
    let detached = match handle.detach_kernel_driver(FEL_INTERFACE) {
        Ok(()) => true,
        Err(e) => {
            debug!("unable to detach kernel driver: {}", e);
            false
        }
    };
    match handle.claim_interface(FEL_INTERFACE) {
        Ok(()) => Ok(detached),
        Err(cause) => {
            if detached {
                if let Err(e) = handle.attach_kernel_driver(FEL_INTERFACE) {
                    warn!("error attaching kernel driver: {}", e);
                }
            }
            Err(FelError::ClaimFailed {
                step: "claim_interface",
                cause,
            })
        }
    }
}

/// Reads the bulk endpoints of the device's active configuration.
fn device_endpoints(device: &Device) -> Result<(u8, u8)> {
    let config = device.active_config_descriptor().map_err(|e| {
            FelError::EndpointNotFound {
                reason: "unable to get active config descriptor".to_owned(),
                cause: Some(e),
            }
        })?;

    let mut endpoints = Vec::new();
    for interface in config.interfaces() {
        for setting in interface.descriptors() {
            for endpoint in setting.endpoint_descriptors() {
                let bulk = match endpoint.transfer_type() {
                    libusb::TransferType::Bulk => true,
                    _ => false,
                };
                let input = match endpoint.direction() {
                    libusb::Direction::In => true,
                    libusb::Direction::Out => false,
                };
                endpoints.push(EndpointInfo {
                    address: endpoint.address(),
                    bulk,
                    input,
                });
            }
        }
    }
    let (endpoint_in, endpoint_out) = select_endpoints(&endpoints)?;
    debug!("FEL endpoints: IN {:#04x}, OUT {:#04x}", endpoint_in, endpoint_out);
    Ok((endpoint_in, endpoint_out))
}

/// Endpoint descriptor summary.
#[derive(Debug, Clone, Copy)]
struct EndpointInfo {
    address: u8,
    bulk: bool,
    input: bool,
}

/// Picks the first bulk IN and the first bulk OUT endpoint.
fn select_endpoints(endpoints: &[EndpointInfo]) -> Result<(u8, u8)> {
    let first = |input: bool| {
        endpoints.iter()
            .find(|ep| ep.bulk && ep.input == input)
            .map(|ep| ep.address)
    };
    match (first(true), first(false)) {
        (Some(endpoint_in), Some(endpoint_out)) => Ok((endpoint_in, endpoint_out)),
        (endpoint_in, endpoint_out) => {
            Err(FelError::EndpointNotFound {
                reason: format!("bulk IN endpoint {}, bulk OUT endpoint {}",
                                if endpoint_in.is_some() { "found" } else { "missing" },
                                if endpoint_out.is_some() { "found" } else { "missing" }),
                cause: None,
            })
        }
    }
}
