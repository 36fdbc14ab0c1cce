//! Environment-driven service configuration.
//!
//! Every knob has a default suitable for a single reader on a small
//! box; deployments override via `TAGDOCK_*` variables.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use tagdock_core::constants::{
    DEFAULT_BIND_ADDR, DEFAULT_BUS_TIMEOUT_MS, DEFAULT_DETECT_TIMEOUT_MS, DEFAULT_LOCK_WAIT_MS,
    DEFAULT_PORT, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_BACKOFF_MS,
};
use tagdock_driver::RetryPolicy;
use tagdock_driver::bus::DEFAULT_BAUD_RATE;

/// Default serial device for the reader.
const DEFAULT_SERIAL_DEVICE: &str = "/dev/ttyUSB0";

/// Default payload tree location.
const DEFAULT_PAYLOAD_DIR: &str = "payloads";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address the command service listens on.
    pub bind_addr: SocketAddr,
    /// Root of the category/payload tree.
    pub payload_dir: PathBuf,
    /// Serial device the PN532 hangs off.
    pub serial_device: String,
    /// Serial baud rate.
    pub baud_rate: u32,
    /// How long a write waits for a tag to appear.
    pub detect_timeout: Duration,
    /// Per-exchange reply budget on the bus.
    pub bus_timeout: Duration,
    /// Transport retry attempts for transient bus faults.
    pub retry_attempts: u32,
    /// Base backoff between retries; grows linearly per attempt.
    pub retry_backoff: Duration,
    /// How long a `write` command waits for the reader before
    /// reporting `busy`. Zero means fail fast.
    pub lock_wait: Duration,
}

impl Config {
    /// Read configuration from `TAGDOCK_*` environment variables,
    /// falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&'static str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_raw =
            lookup("TAGDOCK_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind: IpAddr = bind_raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key: "TAGDOCK_BIND_ADDR",
            value: bind_raw,
        })?;
        let port: u16 = parse_or(&lookup, "TAGDOCK_PORT", DEFAULT_PORT)?;
        Ok(Self {
            bind_addr: SocketAddr::new(bind, port),
            payload_dir: PathBuf::from(
                lookup("TAGDOCK_PAYLOAD_DIR").unwrap_or_else(|| DEFAULT_PAYLOAD_DIR.to_string()),
            ),
            serial_device: lookup("TAGDOCK_SERIAL_DEVICE")
                .unwrap_or_else(|| DEFAULT_SERIAL_DEVICE.to_string()),
            baud_rate: parse_or(&lookup, "TAGDOCK_BAUD_RATE", DEFAULT_BAUD_RATE)?,
            detect_timeout: millis_or(&lookup, "TAGDOCK_DETECT_TIMEOUT_MS", DEFAULT_DETECT_TIMEOUT_MS)?,
            bus_timeout: millis_or(&lookup, "TAGDOCK_BUS_TIMEOUT_MS", DEFAULT_BUS_TIMEOUT_MS)?,
            retry_attempts: parse_or(&lookup, "TAGDOCK_RETRY_ATTEMPTS", DEFAULT_RETRY_ATTEMPTS)?,
            retry_backoff: millis_or(&lookup, "TAGDOCK_RETRY_BACKOFF_MS", DEFAULT_RETRY_BACKOFF_MS)?,
            lock_wait: millis_or(&lookup, "TAGDOCK_LOCK_WAIT_MS", DEFAULT_LOCK_WAIT_MS)?,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts,
            backoff: self.retry_backoff,
        }
    }
}

fn parse_or<T, L>(lookup: &L, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    L: Fn(&'static str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

fn millis_or<L>(lookup: &L, key: &'static str, default_ms: u64) -> Result<Duration, ConfigError>
where
    L: Fn(&'static str) -> Option<String>,
{
    Ok(Duration::from_millis(parse_or(lookup, key, default_ms)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&'static str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<&str, String> =
            vars.iter().map(|(k, v)| (*k, v.to_string())).collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:5555");
        assert_eq!(config.payload_dir, PathBuf::from("payloads"));
        assert_eq!(config.serial_device, "/dev/ttyUSB0");
        assert_eq!(config.detect_timeout, Duration::from_secs(10));
        assert_eq!(config.lock_wait, Duration::ZERO);
        assert_eq!(config.retry_attempts, 3);
    }

    #[test]
    fn overrides_are_honored() {
        let config = config_from(&[
            ("TAGDOCK_PORT", "6000"),
            ("TAGDOCK_BIND_ADDR", "127.0.0.1"),
            ("TAGDOCK_LOCK_WAIT_MS", "250"),
            ("TAGDOCK_PAYLOAD_DIR", "/srv/tags"),
        ])
        .unwrap();
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:6000");
        assert_eq!(config.lock_wait, Duration::from_millis(250));
        assert_eq!(config.payload_dir, PathBuf::from("/srv/tags"));
    }

    #[test]
    fn unparsable_values_are_rejected_with_the_key() {
        let err = config_from(&[("TAGDOCK_PORT", "lots")]).unwrap_err();
        let ConfigError::Invalid { key, value } = err;
        assert_eq!(key, "TAGDOCK_PORT");
        assert_eq!(value, "lots");
    }
}
