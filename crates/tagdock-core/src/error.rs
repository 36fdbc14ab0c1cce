use thiserror::Error;

use crate::constants::{MAX_UID_LENGTH, MIN_UID_LENGTH, TAG_PAGES, TAG_SIZE, USER_DATA_SIZE};

/// Errors from constructing or indexing core tag types.
#[derive(Error, Debug)]
pub enum Error {
    #[error(
        "UID length must be {MIN_UID_LENGTH}-{MAX_UID_LENGTH} bytes, got {0}"
    )]
    InvalidUidLength(usize),

    #[error(
        "tag image must be {TAG_SIZE} bytes (full) or {USER_DATA_SIZE} bytes (user memory), got {0}"
    )]
    InvalidImageSize(usize),

    #[error("page {0} out of range (tag has {TAG_PAGES} pages)")]
    PageOutOfRange(u8),
}

pub type Result<T> = std::result::Result<T, Error>;
