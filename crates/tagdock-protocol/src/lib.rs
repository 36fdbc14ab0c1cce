//! Wire protocol for the tag-writing service.
//!
//! Clients speak newline-delimited JSON over TCP: one [`Request`]
//! object per line, answered by one [`Response`] object per line.
//! [`LineCodec`] adapts the framing to Tokio's `Framed` streams.

pub mod codec;
pub mod envelope;
pub mod error;

pub use codec::LineCodec;
pub use envelope::{
    Request, Response, ResponseData, Status, StatusReport, WriteReport, BUSY_OUTCOME,
};
pub use error::{ProtocolError, ProtocolResult};
