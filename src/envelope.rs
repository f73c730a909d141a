//! `AWUC`/`AWUS` USB framing.
//!
//! Every transfer, whatever its content, is wrapped in a 32-byte `AWUC` request announcing its
//! direction and length, followed by the payload itself and a 13-byte `AWUS` acknowledgement.

use byteorder::{ByteOrder, LittleEndian};
use log::trace;

use crate::chunk::{self, Progress, TransferConfig};
use crate::error::{FelError, Result};
use crate::transport::BulkTransport;

/// Size of the USB request on the wire.
pub const USB_REQUEST_SIZE: usize = 32;
/// Size of the USB response on the wire.
pub const USB_RESPONSE_SIZE: usize = 13;
/// Signature of every USB request.
const AWUC: &[u8; 4] = b"AWUC";
/// Signature of every USB response.
const AWUS: &[u8; 4] = b"AWUS";
/// Unknown constant sent in every USB request.
const AW_USB_UNKNOWN1: u32 = 0x0C00_0000;
/// Allwinner USB read request.
const AW_USB_READ: u16 = 0x11;
/// Allwinner USB write request.
const AW_USB_WRITE: u16 = 0x12;

/// Direction of a USB request, seen from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Device to host (`AW_USB_READ`).
    Read,
    /// Host to device (`AW_USB_WRITE`).
    Write,
}

impl Direction {
    /// Request code on the wire.
    pub fn code(self) -> u16 {
        match self {
            Direction::Read => AW_USB_READ,
            Direction::Write => AW_USB_WRITE,
        }
    }

    /// Parses a request code.
    pub fn from_code(code: u16) -> Option<Direction> {
        match code {
            AW_USB_READ => Some(Direction::Read),
            AW_USB_WRITE => Some(Direction::Write),
            _ => None,
        }
    }
}

/// `AWUC` USB request.
///
/// The length is sent twice; both copies are always populated from the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbRequest {
    direction: Direction,
    length: u32,
}

impl UsbRequest {
    /// Creates a request for a payload of `length` bytes. Only the low 32 bits are sent.
    pub fn new(direction: Direction, length: usize) -> UsbRequest {
        UsbRequest {
            direction,
            length: length as u32,
        }
    }

    /// Direction of the announced payload.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Length of the announced payload.
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Serializes the request.
    pub fn to_bytes(&self) -> [u8; USB_REQUEST_SIZE] {
        let mut request = [0u8; USB_REQUEST_SIZE];
        request[..4].copy_from_slice(AWUC);
        LittleEndian::write_u32(&mut request[8..12], self.length);
        LittleEndian::write_u32(&mut request[12..16], AW_USB_UNKNOWN1);
        LittleEndian::write_u16(&mut request[16..18], self.direction.code());
        // Length is repeated
        LittleEndian::write_u32(&mut request[18..22], self.length);
        // Bytes from 22 to 32 are padding
        request
    }

    /// Parses a serialized request, checking the signature and the repeated length.
    pub fn from_bytes(bytes: &[u8; USB_REQUEST_SIZE]) -> Option<UsbRequest> {
        if &bytes[..4] != AWUC || bytes[4..8].iter().any(|&b| b != 0) {
            return None;
        }
        let length = LittleEndian::read_u32(&bytes[8..12]);
        if LittleEndian::read_u32(&bytes[18..22]) != length {
            return None;
        }
        let direction = Direction::from_code(LittleEndian::read_u16(&bytes[16..18]))?;
        Some(UsbRequest { direction, length })
    }
}

/// Checks a USB response, which must start with `AWUS`.
pub fn check_usb_response(buf: &[u8; USB_RESPONSE_SIZE]) -> Result<()> {
    if &buf[..4] == AWUS {
        Ok(())
    } else {
        Err(FelError::ProtocolDesync {
            found: format!("{}[...]", String::from_utf8_lossy(&buf[..4])),
        })
    }
}

/// Sends the `AWUC` request announcing a payload of `len` bytes.
pub fn send_usb_request<T: BulkTransport + ?Sized>(transport: &T,
                                                   endpoint_out: u8,
                                                   config: &TransferConfig,
                                                   direction: Direction,
                                                   len: usize)
                                                   -> Result<()> {
    trace!("AWUC {:?} request, {} bytes", direction, len);
    let request = UsbRequest::new(direction, len);
    chunk::bulk_send(transport, endpoint_out, &request.to_bytes(), config, None)
}

/// Reads and validates the `AWUS` response.
pub fn read_usb_response<T: BulkTransport + ?Sized>(transport: &T,
                                                    endpoint_in: u8,
                                                    config: &TransferConfig)
                                                    -> Result<()> {
    let mut buf = [0u8; USB_RESPONSE_SIZE];
    chunk::bulk_recv(transport, endpoint_in, &mut buf, config)?;
    check_usb_response(&buf)
}

/// Writes the given data to the USB: request, payload, response.
pub fn usb_write<T: BulkTransport + ?Sized>(transport: &T,
                                            endpoint_out: u8,
                                            endpoint_in: u8,
                                            config: &TransferConfig,
                                            data: &[u8],
                                            progress: Option<Progress>)
                                            -> Result<()> {
    send_usb_request(transport, endpoint_out, config, Direction::Write, data.len())?;
    chunk::bulk_send(transport, endpoint_out, data, config, progress)?;
    read_usb_response(transport, endpoint_in, config)
}

/// Reads the given data from the USB: request, payload, response.
pub fn usb_read<T: BulkTransport + ?Sized>(transport: &T,
                                           endpoint_out: u8,
                                           endpoint_in: u8,
                                           config: &TransferConfig,
                                           data: &mut [u8])
                                           -> Result<()> {
    send_usb_request(transport, endpoint_out, config, Direction::Read, data.len())?;
    chunk::bulk_recv(transport, endpoint_in, data, config)?;
    read_usb_response(transport, endpoint_in, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Event, MockTransport};

    const EP_OUT: u8 = 0x01;
    const EP_IN: u8 = 0x82;

    #[test]
    fn request_layout() {
        let bytes = UsbRequest::new(Direction::Write, 0x1234_5678).to_bytes();
        assert_eq!(&bytes[..8], b"AWUC\0\0\0\0");
        assert_eq!(&bytes[8..12], &[0x78, 0x56, 0x34, 0x12]);
        assert_eq!(&bytes[12..16], &[0x00, 0x00, 0x00, 0x0c]);
        assert_eq!(&bytes[16..18], &[0x12, 0x00]);
        assert_eq!(&bytes[18..22], &[0x78, 0x56, 0x34, 0x12]);
        assert_eq!(&bytes[22..], &[0u8; 10]);

        let read = UsbRequest::new(Direction::Read, 8).to_bytes();
        assert_eq!(&read[16..18], &[0x11, 0x00]);
    }

    #[test]
    fn request_parses_back() {
        let cases = [(Direction::Read, 0),
                     (Direction::Write, 16),
                     (Direction::Read, 0xffff_ffff)];
        for &(direction, len) in &cases {
            let request = UsbRequest::new(direction, len);
            let parsed = UsbRequest::from_bytes(&request.to_bytes()).unwrap();
            assert_eq!(parsed, request);
            assert_eq!(parsed.length(), len as u32);
            assert_eq!(parsed.direction(), direction);
        }
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let mut bytes = UsbRequest::new(Direction::Write, 64).to_bytes();
        bytes[18] = 65;
        assert_eq!(UsbRequest::from_bytes(&bytes), None);
    }

    #[test]
    fn bad_response_signature_is_a_desync() {
        let mut buf = [0u8; USB_RESPONSE_SIZE];
        buf[..4].copy_from_slice(b"AWUC");
        match check_usb_response(&buf) {
            Err(FelError::ProtocolDesync { found }) => assert_eq!(found, "AWUC[...]"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn write_sends_request_payload_then_reads_response() {
        let mock = MockTransport::new();
        mock.queue_ack();
        let payload = [0xde, 0xad, 0xbe, 0xef];
        usb_write(&mock, EP_OUT, EP_IN, &TransferConfig::default(), &payload, None).unwrap();

        let events = mock.events();
        assert_eq!(events.len(), 3);
        match events[0] {
            Event::Out(EP_OUT, ref bytes) => {
                let mut raw = [0u8; USB_REQUEST_SIZE];
                raw.copy_from_slice(bytes);
                assert_eq!(UsbRequest::from_bytes(&raw),
                           Some(UsbRequest::new(Direction::Write, 4)));
            }
            ref e => panic!("unexpected event: {:?}", e),
        }
        assert_eq!(events[1], Event::Out(EP_OUT, payload.to_vec()));
        match events[2] {
            Event::In(EP_IN, ref bytes) => assert_eq!(&bytes[..4], b"AWUS"),
            ref e => panic!("unexpected event: {:?}", e),
        }
    }

    #[test]
    fn read_receives_payload_on_the_in_endpoint() {
        let mock = MockTransport::new();
        mock.queue_read(&[1, 2, 3, 4, 5, 6, 7, 8]);
        mock.queue_ack();
        let mut buf = [0u8; 8];
        usb_read(&mock, EP_OUT, EP_IN, &TransferConfig::default(), &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4, 5, 6, 7, 8]);

        let writes = mock.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1[16], 0x11);
        assert_eq!(mock.read_calls(), 2);
        assert_eq!(mock.pending_reads(), 0);
    }

    #[test]
    fn write_fails_on_garbage_response() {
        let mock = MockTransport::new();
        mock.queue_read(b"garbage here!");
        let err = usb_write(&mock, EP_OUT, EP_IN, &TransferConfig::default(), &[0u8; 16], None)
            .unwrap_err();
        match err {
            FelError::ProtocolDesync { .. } => {}
            e => panic!("unexpected error: {}", e),
        }
    }
}
