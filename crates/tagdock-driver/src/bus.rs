//! Raw byte transport to the reader chip.
//!
//! [`BusLink`] is the seam between the retrying transport and the
//! physical medium: it moves opaque byte frames and knows nothing about
//! PN532 framing, ACKs, or retries. The production implementation is
//! [`SerialLink`] over a serial device; tests substitute the simulated
//! link from [`mock`](crate::mock).

use std::future::Future;
use std::io;
use std::time::{Duration, Instant};

use serialport::SerialPort;
use tracing::{debug, trace};

use crate::error::BusError;

/// Default serial baud rate for a UART-attached PN532.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Gap after which a started reply is considered complete.
///
/// Serial reads return in dribs; once the first byte of a reply has
/// arrived, a pause this long means the chip is done talking.
const INTER_BYTE_TIMEOUT: Duration = Duration::from_millis(20);

/// One serial/bus endpoint capable of raw frame exchanges.
///
/// Implementations must not retry: fault classification and retry
/// policy belong to [`Transport`](crate::transport::Transport).
///
/// Methods are spelled with explicit `Send` futures so the driver can
/// live inside spawned tasks; implementors still write plain
/// `async fn`.
pub trait BusLink: Send + 'static {
    /// Push one raw frame to the device.
    fn transmit(&mut self, frame: &[u8]) -> impl Future<Output = Result<(), BusError>> + Send;

    /// Read up to `max_len` reply bytes, waiting at most `timeout` for
    /// the first byte.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Timeout`] when nothing arrives within
    /// `timeout`.
    fn receive(
        &mut self,
        max_len: usize,
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<u8>, BusError>> + Send;
}

/// [`BusLink`] over a serial device, via the `serialport` crate.
///
/// The crate's port IO is blocking, so every exchange hops through
/// `spawn_blocking`; the port travels into the closure and back, which
/// is why it lives in an `Option`.
pub struct SerialLink {
    port: Option<Box<dyn SerialPort>>,
    path: String,
}

impl SerialLink {
    /// Open the serial device at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Io`] when the device cannot be opened, for
    /// example when it does not exist or the process lacks permission.
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, BusError> {
        let port = serialport::new(path, baud_rate)
            .timeout(Duration::from_millis(50))
            .open()
            .map_err(|e| BusError::Io(io::Error::other(e)))?;
        debug!(path, baud_rate, "serial link opened");
        Ok(Self {
            port: Some(port),
            path: path.to_string(),
        })
    }

    /// The device path this link was opened on.
    pub fn path(&self) -> &str {
        &self.path
    }

    async fn with_port<T, F>(&mut self, op: F) -> Result<T, BusError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn SerialPort) -> Result<T, BusError> + Send + 'static,
    {
        let mut port = self
            .port
            .take()
            .ok_or_else(|| BusError::Io(io::Error::other("serial port lost to a failed task")))?;
        let (port, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut *port);
            (port, result)
        })
        .await
        .map_err(|e| BusError::Io(io::Error::other(e)))?;
        self.port = Some(port);
        result
    }
}

impl BusLink for SerialLink {
    async fn transmit(&mut self, frame: &[u8]) -> Result<(), BusError> {
        trace!(len = frame.len(), "bus tx");
        let frame = frame.to_vec();
        self.with_port(move |port| {
            port.write_all(&frame)?;
            port.flush()?;
            Ok(())
        })
        .await
    }

    async fn receive(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, BusError> {
        let bytes = self
            .with_port(move |port| blocking_receive(port, max_len, timeout))
            .await?;
        trace!(len = bytes.len(), "bus rx");
        Ok(bytes)
    }
}

fn blocking_receive(
    port: &mut dyn SerialPort,
    max_len: usize,
    timeout: Duration,
) -> Result<Vec<u8>, BusError> {
    let deadline = Instant::now() + timeout;
    let mut buf = Vec::with_capacity(max_len);
    let mut chunk = [0u8; 64];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return if buf.is_empty() {
                Err(BusError::Timeout)
            } else {
                Ok(buf)
            };
        }

        // Waiting for the first byte uses the caller's budget; once the
        // reply has started, only the inter-byte gap applies.
        let window = if buf.is_empty() {
            remaining
        } else {
            remaining.min(INTER_BYTE_TIMEOUT)
        };
        port.set_timeout(window)
            .map_err(|e| BusError::Io(io::Error::other(e)))?;

        match port.read(&mut chunk) {
            Ok(0) => continue,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.len() >= max_len {
                    buf.truncate(max_len);
                    return Ok(buf);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                return if buf.is_empty() {
                    Err(BusError::Timeout)
                } else {
                    Ok(buf)
                };
            }
            Err(e) => return Err(BusError::Io(e)),
        }
    }
}
