use std::path::PathBuf;

use thiserror::Error;

/// Catalog-specific error types.
///
/// These cover scanning the payload tree, parsing individual payload
/// files, and lookups against the in-memory index.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The payload root is missing or holds no payload files at all.
    #[error("no payloads found under {root}")]
    EmptySource { root: PathBuf },

    /// A payload file exists but cannot be turned into a tag image.
    #[error("malformed payload {path}: {reason}")]
    MalformedPayload { path: PathBuf, reason: String },

    /// Lookup named a category the index does not contain.
    #[error("unknown category: {0}")]
    CategoryNotFound(String),

    /// Lookup named a payload the category does not contain.
    #[error("unknown payload: {category}/{name}")]
    PayloadNotFound { category: String, name: String },

    /// Filesystem access failed.
    #[error("catalog IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CatalogError {
    pub(crate) fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Specialized result type for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;
