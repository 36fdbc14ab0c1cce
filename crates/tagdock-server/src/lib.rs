//! The tagdock service: exclusive reader sessions and the TCP command
//! front end, assembled from the catalog, driver, and protocol crates.

pub mod config;
pub mod service;
pub mod session;

pub use config::{Config, ConfigError};
pub use service::Service;
pub use session::{Busy, ReaderGate, ReaderToken};
