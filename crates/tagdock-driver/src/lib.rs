//! PN532 reader driver, bus transport, and the tag write state machine.
//!
//! Layering, lowest first:
//!
//! - [`bus`] — the [`BusLink`](bus::BusLink) byte pipe and its serial-port
//!   implementation; knows nothing about PN532 framing.
//! - [`frame`] — PN532 frame construction and validation.
//! - [`transport`] — one verified command/response exchange with bounded
//!   retry for transient faults.
//! - [`pn532`] — the reader chip's command set (firmware probe, SAM
//!   configuration, tag detection, page IO) as a tag-session abstraction.
//! - [`writer`] — the detect → select → write → verify → release state
//!   machine that puts a [`TagImage`](tagdock_core::TagImage) on a tag.
//!
//! The [`mock`] module provides a simulated PN532 on a simulated bus for
//! tests and development without hardware.

pub mod bus;
pub mod error;
pub mod frame;
pub mod mock;
pub mod pn532;
pub mod transport;
pub mod writer;

pub use bus::{BusLink, SerialLink};
pub use error::{BusError, DriverError, Result};
pub use pn532::Pn532;
pub use transport::{RetryPolicy, Transport};
pub use writer::{CompletedWrite, SessionState, WriteOptions, write_to_tag};
