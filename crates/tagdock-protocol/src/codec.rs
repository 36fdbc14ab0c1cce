//! Tokio codec for the line-delimited JSON protocol.
//!
//! One request per line in, one response per line out, for use with
//! Tokio's `Framed` streams. The decoder yields [`Request`] values;
//! the encoder takes [`Response`] values. A length limit on incoming
//! lines keeps a hostile client from growing the buffer without bound.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::envelope::{Request, Response};
use crate::error::ProtocolError;

/// Default maximum request line length in bytes.
///
/// Generous for every legitimate command; the largest request is a
/// `write` with a category and payload name.
const DEFAULT_MAX_LINE_LENGTH: usize = 8 * 1024;

/// Codec for one-command-per-line JSON framing.
#[derive(Debug)]
pub struct LineCodec {
    max_line_length: usize,
    /// Scan resume point, so repeated decode calls on a growing buffer
    /// do not rescan bytes already known to hold no newline.
    scanned: usize,
}

impl LineCodec {
    pub fn new() -> Self {
        Self {
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            scanned: 0,
        }
    }

    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            max_line_length,
            scanned: 0,
        }
    }

    pub fn max_line_length(&self) -> usize {
        self.max_line_length
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = Request;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Request>, ProtocolError> {
        loop {
            let newline = src[self.scanned..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|pos| self.scanned + pos);

            let Some(newline) = newline else {
                if src.len() > self.max_line_length {
                    return Err(ProtocolError::LineTooLong {
                        limit: self.max_line_length,
                    });
                }
                self.scanned = src.len();
                return Ok(None);
            };

            let line = src.split_to(newline + 1);
            self.scanned = 0;
            if newline > self.max_line_length {
                return Err(ProtocolError::LineTooLong {
                    limit: self.max_line_length,
                });
            }

            let trimmed = trim_line(&line[..newline]);
            if trimmed.is_empty() {
                // Tolerate blank keep-alive lines between commands.
                continue;
            }
            return Ok(Some(serde_json::from_slice(trimmed)?));
        }
    }
}

impl Encoder<Response> for LineCodec {
    type Error = ProtocolError;

    fn encode(&mut self, response: Response, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let json = serde_json::to_vec(&response)?;
        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');
        Ok(())
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    &line[start..]
}
