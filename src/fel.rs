//! FEL commands.
//!
//! Each command is a 16-byte FEL request sent as the payload of one `AWUC` write, an optional
//! payload exchange, and an 8-byte FEL status read.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::chunk::Progress;
use crate::envelope;
use crate::error::{FelError, Result};
use crate::soc;
use crate::session::Session;
use crate::transport::BulkTransport;

/// Size of the FEL request on the wire.
pub const FEL_REQUEST_SIZE: usize = 16;
/// Size of the FEL version response on the wire.
pub const FEL_VERSION_SIZE: usize = 32;
/// Size of the FEL status block.
pub const FEL_STATUS_SIZE: usize = 8;

// Request types:
/// Allwinner FEL version request.
pub const AW_FEL_VERSION: u32 = 0x001;
/// Allwinner FEL write request.
pub const AW_FEL_1_WRITE: u32 = 0x101;
/// Allwinner FEL execution request.
pub const AW_FEL_1_EXEC: u32 = 0x102;
/// Allwinner FEL read request.
pub const AW_FEL_1_READ: u32 = 0x103;

/// FEL request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FelRequest {
    /// Request type.
    pub request: u32,
    /// Target address.
    pub address: u32,
    /// Payload length.
    pub length: u32,
}

impl FelRequest {
    /// Serializes the request. The last 4 bytes are padding.
    pub fn to_bytes(&self) -> [u8; FEL_REQUEST_SIZE] {
        let mut request = [0u8; FEL_REQUEST_SIZE];
        LittleEndian::write_u32(&mut request[..4], self.request);
        LittleEndian::write_u32(&mut request[4..8], self.address);
        LittleEndian::write_u32(&mut request[8..12], self.length);
        request
    }

    /// Parses a serialized request.
    pub fn from_bytes(bytes: &[u8; FEL_REQUEST_SIZE]) -> FelRequest {
        FelRequest {
            request: LittleEndian::read_u32(&bytes[..4]),
            address: LittleEndian::read_u32(&bytes[4..8]),
            length: LittleEndian::read_u32(&bytes[8..12]),
        }
    }
}

/// SoC version information, as reported by the `AW_FEL_VERSION` request.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    signature: [u8; 8],
    /// `0x00162300` on the wire, `0x1623` once decoded.
    soc_id: u32,
    /// `1`.
    unknown_0a: u32,
    /// `1`.
    protocol: u16,
    /// `0x7e00`.
    scratchpad: u16,
    pad: [u32; 2],
}

impl VersionInfo {
    /// Decodes the version response.
    pub fn from_bytes(bytes: &[u8; FEL_VERSION_SIZE]) -> VersionInfo {
        let mut signature = [0u8; 8];
        signature.copy_from_slice(&bytes[..8]);

        VersionInfo {
            signature,
            soc_id: (LittleEndian::read_u32(&bytes[8..12]) >> 8) & 0xFFFF,
            unknown_0a: LittleEndian::read_u32(&bytes[12..16]),
            protocol: LittleEndian::read_u16(&bytes[16..18]),
            // Bytes 18 and 19 are unknown (`0x44`, `0x08`).
            scratchpad: LittleEndian::read_u16(&bytes[20..22]),
            pad: [LittleEndian::read_u32(&bytes[24..28]),
                  LittleEndian::read_u32(&bytes[28..32])],
        }
    }

    /// Raw signature.
    pub fn signature(&self) -> &[u8; 8] {
        &self.signature
    }

    /// Decoded SoC ID, e.g. `0x1623` for the *A10*.
    pub fn soc_id(&self) -> u32 {
        self.soc_id
    }

    /// SoC name, if the ID is known.
    pub fn soc_name(&self) -> Option<&'static str> {
        soc::soc_name(self.soc_id)
    }

    /// Unknown field, `1` on every known device.
    pub fn unknown_0a(&self) -> u32 {
        self.unknown_0a
    }

    /// FEL protocol version.
    pub fn protocol(&self) -> u16 {
        self.protocol
    }

    /// Address of a RAM area usable as scratch space.
    pub fn scratchpad(&self) -> u16 {
        self.scratchpad
    }

    /// Trailing reserved words.
    pub fn pad(&self) -> [u32; 2] {
        self.pad
    }
}

impl fmt::Debug for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f,
               "Signature: {}, SoC ID: {:#010x} ({}), protocol: {:#06x}, scratchpad: {:#010x}",
               String::from_utf8_lossy(&self.signature).trim_end_matches('\0'),
               self.soc_id,
               self.soc_name().unwrap_or("unknown"),
               self.protocol,
               self.scratchpad)
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f,
               "{} soc={:08x}({}) {:08x} ver={:04x} scratchpad={:08x} {:08x} {:08x}",
               String::from_utf8_lossy(&self.signature).trim_end_matches('\0'),
               self.soc_id,
               self.soc_name().unwrap_or("unknown"),
               self.unknown_0a,
               self.protocol,
               self.scratchpad,
               self.pad[0],
               self.pad[1])
    }
}

/// FEL status block read after every request.
///
/// Its content is not interpreted; it is kept so that callers can inspect it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FelStatus(pub [u8; FEL_STATUS_SIZE]);

impl FelStatus {
    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; FEL_STATUS_SIZE] {
        &self.0
    }
}

/// Checks that `len` bytes starting at `offset` fit in the 32-bit address space, and that `len`
/// fits in the 32-bit length fields of the requests.
fn check_range(offset: u32, len: usize) -> Result<()> {
    if len as u64 > u64::from(u32::MAX) || len as u64 > u64::from(u32::MAX - offset) + 1 {
        Err(FelError::AddressOverflow {
            offset,
            length: len,
        })
    } else {
        Ok(())
    }
}

impl<T: BulkTransport> Session<T> {
    /// Gets the SoC version information.
    pub fn get_version(&mut self) -> Result<VersionInfo> {
        self.send_fel_request(AW_FEL_VERSION, 0, 0)?;
        let mut buf = [0u8; FEL_VERSION_SIZE];
        self.usb_read(&mut buf)?;
        self.read_fel_status()?;

        let version = VersionInfo::from_bytes(&buf);
        debug!("FEL version: {:?}", version);
        Ok(version)
    }

    /// Reads from the FEL device memory at the given offset, filling the whole buffer.
    pub fn read_memory_into(&mut self, offset: u32, buf: &mut [u8]) -> Result<FelStatus> {
        check_range(offset, buf.len())?;
        self.send_fel_request(AW_FEL_1_READ, offset, buf.len())?;
        self.usb_read(buf)?;
        self.read_fel_status()
    }

    /// Reads `len` bytes from the FEL device memory at the given offset.
    pub fn read_memory(&mut self, offset: u32, len: usize) -> Result<Vec<u8>> {
        check_range(offset, len)?;
        let mut buf = vec![0u8; len];
        let _ = self.read_memory_into(offset, &mut buf)?;
        Ok(buf)
    }

    /// Writes to the FEL device memory at the given offset.
    pub fn write_memory(&mut self, offset: u32, buf: &[u8]) -> Result<FelStatus> {
        self.write_buffer(offset, buf, None)
    }

    /// Writes to the FEL device memory at the given offset, calling `on_chunk` with the size of
    /// every chunk sent.
    ///
    /// Transfers use smaller chunks so that updates are frequent, which makes this slower than
    /// `write_memory()`; it is meant for large images.
    pub fn write_memory_with_progress<F>(&mut self,
                                         offset: u32,
                                         buf: &[u8],
                                         mut on_chunk: F)
                                         -> Result<FelStatus>
        where F: FnMut(usize)
    {
        self.write_buffer(offset, buf, Some(&mut on_chunk))
    }

    /// Fills `num_bytes` bytes of memory at the given offset with the given byte.
    pub fn fill_memory(&mut self, offset: u32, num_bytes: usize, byte: u8) -> Result<FelStatus> {
        check_range(offset, num_bytes)?;
        let buf = vec![byte; num_bytes];
        self.write_memory(offset, &buf)
    }

    /// Makes the FEL device execute the code at the given address.
    pub fn execute(&mut self, offset: u32) -> Result<FelStatus> {
        self.send_fel_request(AW_FEL_1_EXEC, offset, 0)?;
        self.read_fel_status()
    }

    /// Status block of the last FEL request.
    pub fn last_status(&self) -> Option<FelStatus> {
        self.last_status
    }

    fn write_buffer(&mut self, offset: u32, buf: &[u8], progress: Option<Progress>)
                    -> Result<FelStatus> {
        check_range(offset, buf.len())?;
        self.send_fel_request(AW_FEL_1_WRITE, offset, buf.len())?;
        self.usb_write(buf, progress)?;
        self.read_fel_status()
    }

    /// Sends a FEL request.
    fn send_fel_request(&mut self, request: u32, address: u32, len: usize) -> Result<()> {
        let request = FelRequest {
            request,
            address,
            length: len as u32,
        };
        debug!("FEL request {:#05x} at {:#010x}, {} bytes", request.request, address, len);
        self.usb_write(&request.to_bytes(), None)
    }

    /// Reads the FEL status.
    fn read_fel_status(&mut self) -> Result<FelStatus> {
        let mut status = FelStatus::default();
        self.usb_read(&mut status.0)?;
        self.last_status = Some(status);
        Ok(status)
    }

    fn usb_write(&mut self, data: &[u8], progress: Option<Progress>) -> Result<()> {
        self.check_usable()?;
        let result = envelope::usb_write(self.transport(),
                                         self.endpoint_out(),
                                         self.endpoint_in(),
                                         self.transfer_config(),
                                         data,
                                         progress);
        self.poison_on_error(result)
    }

    fn usb_read(&mut self, data: &mut [u8]) -> Result<()> {
        self.check_usable()?;
        let result = envelope::usb_read(self.transport(),
                                        self.endpoint_out(),
                                        self.endpoint_in(),
                                        self.transfer_config(),
                                        data);
        self.poison_on_error(result)
    }
}
