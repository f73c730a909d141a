//! Chunked bulk transfers.

use std::time::Duration;

use log::trace;

use crate::error::{FelError, Result};
use crate::transport::BulkTransport;

/// Default USB timeout (in seconds).
pub const USB_TIMEOUT: u64 = 10;
/// `AW_USB_MAX_BULK_SEND` and the timeout constant `USB_TIMEOUT` are related. Both need to be
/// selected in a way that transferring the maximum chunk size with (SoC-specific) slow transfer
/// speed won't time out.
///
/// The *512 KiB* here are chosen based on the assumption that we want a 10 seconds timeout, and
/// "slow" transfers take place at approx. *64 KiB/sec*, so we can expect the maximum chunk being
/// transmitted within 8 seconds or less.
pub const AW_USB_MAX_BULK_SEND: usize = 512 * 1024;
/// Chunk size used when progress notifications are requested. With "slow" transfers this gives
/// one update every two seconds.
pub const AW_USB_PROGRESS_CHUNK: usize = 128 * 1024;

/// Timeout and chunk sizes of the bulk transfers of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    /// Timeout of every single bulk call.
    pub timeout: Duration,
    /// Chunk size without progress notifications.
    pub max_chunk: usize,
    /// Chunk size with progress notifications.
    pub progress_chunk: usize,
}

impl TransferConfig {
    /// Transfer configuration with the given timeout and the default chunk sizes.
    pub fn with_timeout(timeout: Duration) -> TransferConfig {
        TransferConfig {
            timeout,
            ..TransferConfig::default()
        }
    }

    /// Chunk size to use depending on whether progress is reported.
    pub fn chunk_size(&self, progress: bool) -> usize {
        if progress {
            self.progress_chunk
        } else {
            self.max_chunk
        }
    }
}

impl Default for TransferConfig {
    fn default() -> TransferConfig {
        TransferConfig {
            timeout: Duration::from_secs(USB_TIMEOUT),
            max_chunk: AW_USB_MAX_BULK_SEND,
            progress_chunk: AW_USB_PROGRESS_CHUNK,
        }
    }
}

/// Callback invoked after every chunk with the number of bytes of that chunk.
pub type Progress<'p> = &'p mut dyn FnMut(usize);

/// Sends data to the USB in bulk.
///
/// It will divide the data in chunks, notifying `progress` after each one of them.
pub fn bulk_send<T: BulkTransport + ?Sized>(transport: &T,
                                            endpoint: u8,
                                            data: &[u8],
                                            config: &TransferConfig,
                                            mut progress: Option<Progress>)
                                            -> Result<()> {
    let max_chunk = config.chunk_size(progress.is_some());
    let mut sent = 0;
    while sent < data.len() {
        let end = data.len().min(sent + max_chunk);
        let n = transport.write_bulk(endpoint, &data[sent..end], config.timeout)
            .and_then(stalled)
            .map_err(|cause| {
                FelError::TransferFailed {
                    step: "usb_bulk_send",
                    transferred: sent,
                    cause,
                }
            })?;
        trace!("bulk send on {:#04x}: {} bytes ({}/{})", endpoint, n, sent + n, data.len());
        sent += n;

        if let Some(ref mut progress) = progress {
            progress(n);
        }
    }
    Ok(())
}

/// Receives data from the USB in bulk.
///
/// It will divide the data in chunks of at most `config.max_chunk` bytes.
pub fn bulk_recv<T: BulkTransport + ?Sized>(transport: &T,
                                            endpoint: u8,
                                            data: &mut [u8],
                                            config: &TransferConfig)
                                            -> Result<()> {
    let len = data.len();
    let mut received = 0;
    while received < len {
        let end = len.min(received + config.max_chunk);
        let n = transport.read_bulk(endpoint, &mut data[received..end], config.timeout)
            .and_then(stalled)
            .map_err(|cause| {
                FelError::TransferFailed {
                    step: "usb_bulk_recv",
                    transferred: received,
                    cause,
                }
            })?;
        trace!("bulk recv on {:#04x}: {} bytes ({}/{})", endpoint, n, received + n, len);
        received += n;
    }
    Ok(())
}

/// A bulk call that moved nothing without reporting an error would loop forever.
fn stalled(n: usize) -> libusb::Result<usize> {
    if n == 0 {
        Err(libusb::Error::Io)
    } else {
        Ok(n)
    }
}
