//! The write sequence: detect, select, check, write, verify, release.
//!
//! [`write_to_tag`] drives a [`Pn532`] through one complete tag write
//! and folds every failure into a [`WriteOutcome`], so callers get a
//! closed set of results instead of raw driver errors. The tag is
//! released on every exit path.

use std::time::Duration;

use tracing::{debug, info, warn};

use tagdock_core::constants::{
    CC_PAGE, DEFAULT_DETECT_TIMEOUT_MS, FIRST_USER_PAGE, LAST_USER_PAGE, NTAG215_CC_SIZE_BYTE,
    PAGE_SIZE,
};
use tagdock_core::{TagImage, TagUid, WriteOutcome};

use crate::bus::BusLink;
use crate::error::DriverError;
use crate::pn532::Pn532;

/// User-region pages sampled during verification.
///
/// First, middle, and last page of the writable region; a full
/// read-back would triple the time spent with the tag in the field.
pub const VERIFY_PAGES: [u8; 3] = [FIRST_USER_PAGE, 66, LAST_USER_PAGE];

/// Phase of an in-progress write, for structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Detecting,
    Selecting,
    CheckingType,
    Writing,
    Verifying,
    Releasing,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Detecting => "detecting",
            Self::Selecting => "selecting",
            Self::CheckingType => "checking_type",
            Self::Writing => "writing",
            Self::Verifying => "verifying",
            Self::Releasing => "releasing",
        };
        f.write_str(name)
    }
}

/// Knobs for one write attempt.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// How long to wait for a tag to enter the field.
    pub detect_timeout: Duration,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            detect_timeout: Duration::from_millis(DEFAULT_DETECT_TIMEOUT_MS),
        }
    }
}

/// Write `image` to whatever tag shows up, then verify a sample of it.
///
/// Never touches pages outside the user region: UID, capability
/// container, and lock pages are left as the factory set them. The
/// outcome is total over everything that can go wrong at the tag.
pub async fn write_to_tag<L: BusLink>(
    reader: &mut Pn532<L>,
    image: &TagImage,
    options: &WriteOptions,
) -> CompletedWrite {
    let completed = run_write(reader, image, options).await;
    debug!(state = %SessionState::Releasing, "write finished");
    reader.release().await;
    match &completed.outcome {
        WriteOutcome::Success => info!(outcome = %completed.outcome, "tag written"),
        other => warn!(outcome = %other, "write did not complete"),
    }
    completed
}

/// Result of one write attempt: the outcome plus the UID of whichever
/// tag was in the field, if one was ever detected.
#[derive(Debug, Clone)]
pub struct CompletedWrite {
    pub outcome: WriteOutcome,
    pub uid: Option<TagUid>,
}

impl CompletedWrite {
    fn without_tag(outcome: WriteOutcome) -> Self {
        Self { outcome, uid: None }
    }
}

async fn run_write<L: BusLink>(
    reader: &mut Pn532<L>,
    image: &TagImage,
    options: &WriteOptions,
) -> CompletedWrite {
    debug!(state = %SessionState::Detecting, timeout_ms = options.detect_timeout.as_millis() as u64);
    let uid = match reader.detect_tag(options.detect_timeout).await {
        Ok(Some(uid)) => uid,
        Ok(None) => return CompletedWrite::without_tag(WriteOutcome::NoTagDetected),
        Err(e) => return CompletedWrite::without_tag(outcome_of(e)),
    };

    let completed = |outcome| CompletedWrite {
        outcome,
        uid: Some(uid.clone()),
    };

    debug!(state = %SessionState::Selecting, %uid);
    if let Err(e) = reader.select_tag(&uid).await {
        return completed(outcome_of(e));
    }

    debug!(state = %SessionState::CheckingType);
    let cc = match reader.read_page(CC_PAGE).await {
        Ok(chunk) => [chunk[0], chunk[1], chunk[2], chunk[3]],
        Err(e) => return completed(outcome_of(e)),
    };
    if !is_writable_cc(&cc) {
        return completed(WriteOutcome::WrongTagType);
    }

    debug!(state = %SessionState::Writing, pages = LAST_USER_PAGE - FIRST_USER_PAGE + 1);
    for (page, data) in image.user_pages() {
        if let Err(e) = reader.write_page(page, &data).await {
            return completed(outcome_of(e));
        }
    }

    debug!(state = %SessionState::Verifying, pages = ?VERIFY_PAGES);
    for page in VERIFY_PAGES {
        let read_back = match reader.read_page(page).await {
            Ok(chunk) => chunk,
            Err(e) => return completed(outcome_of(e)),
        };
        match image.page(page) {
            Ok(expected) if read_back[..PAGE_SIZE] == expected => {}
            _ => return completed(WriteOutcome::VerificationFailed { page }),
        }
    }

    completed(WriteOutcome::Success)
}

/// A tag is writable when it is an NTAG215 or still factory blank.
///
/// A blank tag carries an all-zero capability container until its
/// first NDEF formatting, so size-byte matching alone would refuse
/// fresh stock.
fn is_writable_cc(cc: &[u8; PAGE_SIZE]) -> bool {
    cc == &[0u8; PAGE_SIZE] || cc[2] == NTAG215_CC_SIZE_BYTE
}

fn outcome_of(error: DriverError) -> WriteOutcome {
    match error {
        DriverError::NotPresent => WriteOutcome::NoTagDetected,
        DriverError::WrongTagType { .. } => WriteOutcome::WrongTagType,
        DriverError::WriteRejected { page, .. } => WriteOutcome::WriteRejected { page },
        DriverError::Bus(_) => WriteOutcome::BusFault,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BusError;

    #[test]
    fn writable_cc_accepts_ntag215_and_blank() {
        assert!(is_writable_cc(&[0xE1, 0x10, 0x3E, 0x00]));
        assert!(is_writable_cc(&[0x00; 4]));
        // NTAG213 size byte.
        assert!(!is_writable_cc(&[0xE1, 0x10, 0x12, 0x00]));
        // NTAG216 size byte.
        assert!(!is_writable_cc(&[0xE1, 0x10, 0x6D, 0x00]));
    }

    #[test]
    fn driver_errors_map_to_outcomes() {
        assert_eq!(
            outcome_of(DriverError::NotPresent),
            WriteOutcome::NoTagDetected
        );
        assert_eq!(
            outcome_of(DriverError::WriteRejected { page: 7, status: 0x05 }),
            WriteOutcome::WriteRejected { page: 7 }
        );
        assert_eq!(
            outcome_of(DriverError::Bus(BusError::Timeout)),
            WriteOutcome::BusFault
        );
    }

    #[test]
    fn verify_pages_span_the_user_region() {
        assert_eq!(VERIFY_PAGES[0], FIRST_USER_PAGE);
        assert_eq!(*VERIFY_PAGES.last().unwrap(), LAST_USER_PAGE);
        for page in VERIFY_PAGES {
            assert!((FIRST_USER_PAGE..=LAST_USER_PAGE).contains(&page));
        }
    }
}
