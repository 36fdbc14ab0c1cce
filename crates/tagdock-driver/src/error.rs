//! Error types for the bus transport and reader driver layers.
//!
//! The split mirrors the retry design: [`BusError`] is the transport's
//! vocabulary and the only place automatic retry happens; [`DriverError`]
//! is operation-level and never retried — the write state machine
//! translates it into a terminal outcome instead.

use thiserror::Error;

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;

/// Faults at the bus-transport level.
#[derive(Debug, Error)]
pub enum BusError {
    /// The device produced no bytes within the exchange budget.
    #[error("bus exchange timed out")]
    Timeout,

    /// The device did not acknowledge the command frame.
    #[error("no ACK from reader")]
    NoAck,

    /// A reply arrived but its framing or checksums are invalid.
    #[error("garbled response: {0}")]
    Garbled(String),

    /// Underlying serial/OS failure.
    #[error("bus I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BusError {
    /// Whether the transport may retry this fault.
    ///
    /// Only an absent reply is retried. A garbled frame or an OS-level
    /// failure escalates immediately; nothing above the transport
    /// retries either.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::NoAck)
    }
}

/// Operation-level failures of the reader driver.
#[derive(Debug, Error)]
pub enum DriverError {
    /// No tag is addressed on the bus, or the addressed tag vanished.
    #[error("no tag present")]
    NotPresent,

    /// The tag on the reader is not of the expected family.
    ///
    /// Fatal to the current operation; a payload for the 504-byte user
    /// layout must never be written to an incompatible tag.
    #[error("wrong tag type (CC size byte {cc_size_byte:#04x})")]
    WrongTagType { cc_size_byte: u8 },

    /// The tag refused a page write.
    #[error("tag rejected write to page {page} (status {status:#04x})")]
    WriteRejected { page: u8, status: u8 },

    /// Transport-level fault that survived the retry policy.
    #[error(transparent)]
    Bus(#[from] BusError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(BusError::Timeout.is_transient());
        assert!(BusError::NoAck.is_transient());
        assert!(!BusError::Garbled("bad checksum".into()).is_transient());
        assert!(!BusError::Io(std::io::Error::other("gone")).is_transient());
    }

    #[test]
    fn driver_error_messages() {
        let e = DriverError::WriteRejected {
            page: 42,
            status: 0x05,
        };
        assert_eq!(e.to_string(), "tag rejected write to page 42 (status 0x05)");

        let e = DriverError::WrongTagType { cc_size_byte: 0x12 };
        assert!(e.to_string().contains("0x12"));
    }
}
