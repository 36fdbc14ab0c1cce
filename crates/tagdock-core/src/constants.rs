//! Tag-layout and service-wide constants.
//!
//! The only tag family tagdock writes is NTAG215: 135 pages of 4 bytes
//! (540 bytes total), of which pages 4-129 are user memory. These
//! constants pin that layout down in one place so the driver, the
//! catalog parsers, and the verification step can never disagree about
//! where a page lives.
//!
//! # Page map
//!
//! ```text
//! page   0-2   UID / internal        never written
//! page   3     capability container  read for the family check
//! page   4-129 user memory           written strictly ascending
//! page 130-134 dynamic lock / config never written
//! ```

// ============================================================================
// NTAG215 layout
// ============================================================================

/// Bytes per tag page.
pub const PAGE_SIZE: usize = 4;

/// Total number of pages on an NTAG215.
pub const TAG_PAGES: usize = 135;

/// Full tag image size in bytes (135 pages x 4 bytes).
pub const TAG_SIZE: usize = TAG_PAGES * PAGE_SIZE;

/// Page holding the capability container (CC).
///
/// The CC identifies the tag family; it is read before any destructive
/// write and is never written by this service.
pub const CC_PAGE: u8 = 3;

/// First user-memory page.
pub const FIRST_USER_PAGE: u8 = 4;

/// Last user-memory page (inclusive).
pub const LAST_USER_PAGE: u8 = 129;

/// Number of user-memory pages (4-129 inclusive).
pub const USER_PAGE_COUNT: usize = (LAST_USER_PAGE - FIRST_USER_PAGE) as usize + 1;

/// User-memory size in bytes.
///
/// This is the size of the "payload" the catalog hands to the write
/// state machine when a source file carries only the user region.
pub const USER_DATA_SIZE: usize = USER_PAGE_COUNT * PAGE_SIZE;

/// Capability container bytes of a formatted NTAG215.
///
/// Byte 2 (`0x3E`) is the CC size byte that identifies the family. A
/// factory-blank tag carries an all-zero CC instead and is still
/// writable, so the family check accepts both.
pub const NTAG215_CC: [u8; PAGE_SIZE] = [0xE1, 0x10, 0x3E, 0x00];

/// CC size byte identifying the NTAG215 family.
pub const NTAG215_CC_SIZE_BYTE: u8 = 0x3E;

// ============================================================================
// UID constraints (ISO 14443)
// ============================================================================

/// Minimum UID length in bytes.
pub const MIN_UID_LENGTH: usize = 4;

/// Maximum UID length in bytes.
pub const MAX_UID_LENGTH: usize = 10;

// ============================================================================
// Service defaults
// ============================================================================

/// Default TCP listen address.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";

/// Default TCP listen port.
pub const DEFAULT_PORT: u16 = 5555;

/// Default tag-detection window in milliseconds.
///
/// How long a `write` command waits for a tag to appear on the reader
/// before giving up with a `no_tag` outcome.
pub const DEFAULT_DETECT_TIMEOUT_MS: u64 = 10_000;

/// Default per-exchange bus timeout in milliseconds.
pub const DEFAULT_BUS_TIMEOUT_MS: u64 = 500;

/// Default number of transport-level attempts per exchange.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default base backoff between transport retries in milliseconds.
///
/// Backoff grows linearly: 50ms after the first failed attempt, 100ms
/// after the second, and so on.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 50;

/// Default time a `write` command waits for the reader lock before
/// reporting `busy`. Zero means reject contenders immediately.
pub const DEFAULT_LOCK_WAIT_MS: u64 = 0;

/// File extension of catalog payload files.
pub const PAYLOAD_FILE_EXTENSION: &str = "nfc";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_consistent() {
        assert_eq!(TAG_SIZE, 540);
        assert_eq!(USER_PAGE_COUNT, 126);
        assert_eq!(USER_DATA_SIZE, 504);
        assert_eq!(
            FIRST_USER_PAGE as usize * PAGE_SIZE + USER_DATA_SIZE,
            (LAST_USER_PAGE as usize + 1) * PAGE_SIZE
        );
        assert!(LAST_USER_PAGE < TAG_PAGES as u8);
    }

    #[test]
    fn cc_size_byte_matches_cc() {
        assert_eq!(NTAG215_CC[2], NTAG215_CC_SIZE_BYTE);
    }
}
