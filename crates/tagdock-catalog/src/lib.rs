//! Filesystem-backed payload catalog.
//!
//! Payloads live on disk as one subdirectory per category, each
//! holding `.nfc` files in any of the accepted formats (full binary,
//! user-region binary, or text dump). [`Catalog`] parses the whole
//! tree at startup and serves lookups from an atomically swappable
//! snapshot, so listing is lock-light and a rescan never tears a
//! reader's view.

pub mod catalog;
pub mod error;
pub mod payload;

pub use catalog::{Catalog, Payload};
pub use error::{CatalogError, CatalogResult};
pub use payload::parse_payload;
