//! Core tag types shared across the workspace.

use std::fmt;

use crate::constants::{
    FIRST_USER_PAGE, LAST_USER_PAGE, MAX_UID_LENGTH, MIN_UID_LENGTH, NTAG215_CC, PAGE_SIZE,
    TAG_SIZE,
};
use crate::error::{Error, Result};

/// Unique identifier of a tag addressed on the bus.
///
/// UIDs are 4-10 bytes per ISO 14443. The driver reports one from
/// `InListPassiveTarget` and the write state machine selects against it.
///
/// # Examples
///
/// ```
/// use tagdock_core::TagUid;
///
/// let uid = TagUid::new(vec![0x04, 0xAB, 0xCD, 0xEF]).unwrap();
/// assert_eq!(uid.to_hex(), "04ABCDEF");
///
/// assert!(TagUid::new(vec![0x01]).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagUid(Vec<u8>);

impl TagUid {
    /// Create a UID, validating its length.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUidLength`] when the byte count is
    /// outside 4-10.
    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        if !(MIN_UID_LENGTH..=MAX_UID_LENGTH).contains(&bytes.len()) {
            return Err(Error::InvalidUidLength(bytes.len()));
        }
        Ok(Self(bytes))
    }

    /// UID bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Uppercase hex rendering, the form used in logs and responses.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02X}")).collect()
    }
}

impl fmt::Display for TagUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// PN532 firmware identification, returned by the startup probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion {
    /// IC identifier (0x32 for a PN532).
    pub ic: u8,
    /// Firmware major version.
    pub version: u8,
    /// Firmware revision.
    pub revision: u8,
    /// Supported-protocols bitmask.
    pub support: u8,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.version, self.revision)
    }
}

/// Full 540-byte NTAG215 image: the in-memory form of one payload.
///
/// Immutable once built. The catalog owns the canonical copy; the write
/// state machine borrows it for the duration of one write.
#[derive(Clone, PartialEq, Eq)]
pub struct TagImage {
    bytes: Box<[u8; TAG_SIZE]>,
}

impl TagImage {
    /// Build an image from a full 540-byte dump.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidImageSize`] for any other length.
    pub fn from_full(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != TAG_SIZE {
            return Err(Error::InvalidImageSize(bytes.len()));
        }
        let mut image = Box::new([0u8; TAG_SIZE]);
        image.copy_from_slice(bytes);
        Ok(Self { bytes: image })
    }

    /// Build an image from the 504-byte user region alone.
    ///
    /// Header pages are synthesized: UID pages zeroed, the capability
    /// container set to the formatted NTAG215 value. Only user pages
    /// are ever written to a tag, so the synthesized header exists just
    /// to keep page arithmetic uniform.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidImageSize`] when `bytes` is not exactly
    /// the user-memory size.
    pub fn from_user_region(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != crate::constants::USER_DATA_SIZE {
            return Err(Error::InvalidImageSize(bytes.len()));
        }
        let mut image = Box::new([0u8; TAG_SIZE]);
        let cc_offset = crate::constants::CC_PAGE as usize * PAGE_SIZE;
        image[cc_offset..cc_offset + PAGE_SIZE].copy_from_slice(&NTAG215_CC);
        let user_offset = FIRST_USER_PAGE as usize * PAGE_SIZE;
        image[user_offset..user_offset + bytes.len()].copy_from_slice(bytes);
        Ok(Self { bytes: image })
    }

    /// The 4 bytes of one page.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PageOutOfRange`] for pages past the end of the
    /// tag.
    pub fn page(&self, page: u8) -> Result<[u8; PAGE_SIZE]> {
        let offset = page as usize * PAGE_SIZE;
        if offset + PAGE_SIZE > TAG_SIZE {
            return Err(Error::PageOutOfRange(page));
        }
        let mut out = [0u8; PAGE_SIZE];
        out.copy_from_slice(&self.bytes[offset..offset + PAGE_SIZE]);
        Ok(out)
    }

    /// Iterate the user-memory pages in ascending order.
    ///
    /// This is exactly the sequence the write state machine puts on the
    /// tag, lock and config pages excluded.
    pub fn user_pages(&self) -> impl Iterator<Item = (u8, [u8; PAGE_SIZE])> + '_ {
        (FIRST_USER_PAGE..=LAST_USER_PAGE).map(|page| {
            let offset = page as usize * PAGE_SIZE;
            let mut out = [0u8; PAGE_SIZE];
            out.copy_from_slice(&self.bytes[offset..offset + PAGE_SIZE]);
            (page, out)
        })
    }

    /// The full 540-byte image.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..]
    }
}

impl fmt::Debug for TagImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 540 bytes of hex is noise in logs; show the edges.
        write!(
            f,
            "TagImage({:02X?}..{:02X?})",
            &self.bytes[..4],
            &self.bytes[TAG_SIZE - 4..]
        )
    }
}

/// Terminal outcome of one write operation.
///
/// The write state machine always runs to one of these; errors below it
/// never escape as faults. None of them are retried automatically --
/// retry is the remote operator's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// All user pages written and the read-back sample matched.
    Success,
    /// No tag appeared within the detection window.
    NoTagDetected,
    /// The tag on the reader is not an NTAG215; nothing was written.
    WrongTagType,
    /// The tag rejected a page write.
    WriteRejected { page: u8 },
    /// A read-back page differed from the intended payload.
    VerificationFailed { page: u8 },
    /// The bus failed after transport-level retries were exhausted.
    BusFault,
}

impl WriteOutcome {
    /// The wire name used in `write` responses.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NoTagDetected => "no_tag",
            Self::WrongTagType => "wrong_tag_type",
            Self::WriteRejected { .. } => "write_rejected",
            Self::VerificationFailed { .. } => "verification_failed",
            Self::BusFault => "bus_fault",
        }
    }

    /// Whether the operation completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for WriteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WriteRejected { page } => write!(f, "write_rejected at page {page}"),
            Self::VerificationFailed { page } => {
                write!(f, "verification_failed at page {page}")
            }
            other => f.write_str(other.wire_name()),
        }
    }
}
