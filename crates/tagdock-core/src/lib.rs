//! Shared types and constants for the tagdock tag-writing service.
//!
//! This crate defines the vocabulary the rest of the workspace speaks:
//! the NTAG215 page layout, tag UIDs, full tag images, firmware version
//! info, and the terminal outcomes of a write operation.

pub mod constants;
pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
