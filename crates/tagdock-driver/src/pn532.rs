//! The PN532 command set as a tag-session abstraction.
//!
//! Each public method is one thin state transition over transport
//! exchanges: probe firmware, configure the security module, detect and
//! select a tag, move pages, release. The driver tracks which target is
//! currently addressed so page IO against a vanished tag fails as
//! [`DriverError::NotPresent`] instead of surfacing raw bus noise.

use std::time::Duration;

use tracing::{debug, trace, warn};

use tagdock_core::constants::PAGE_SIZE;
use tagdock_core::{FirmwareVersion, TagUid};

use crate::bus::BusLink;
use crate::error::{BusError, DriverError, Result};
use crate::frame;
use crate::transport::{RetryPolicy, Transport};

// PN532 command bytes.
const CMD_GET_FIRMWARE_VERSION: u8 = 0x02;
const CMD_SAM_CONFIGURATION: u8 = 0x14;
const CMD_IN_LIST_PASSIVE_TARGET: u8 = 0x4A;
const CMD_IN_DATA_EXCHANGE: u8 = 0x40;
const CMD_IN_SELECT: u8 = 0x54;
const CMD_IN_RELEASE: u8 = 0x52;

// NTAG commands carried inside InDataExchange.
const NTAG_CMD_READ: u8 = 0x30;
const NTAG_CMD_WRITE: u8 = 0xA2;

/// 106 kbps ISO 14443 Type A, the only baud modulation NTAGs speak.
const BAUD_106_TYPE_A: u8 = 0x00;

/// Logical target number; we list at most one tag at a time.
const TARGET_1: u8 = 0x01;

/// An NTAG `READ` returns four pages at once.
pub const READ_CHUNK: usize = 4 * PAGE_SIZE;

/// Pause between detection polls while no tag is in the field.
const DETECT_POLL_INTERVAL: Duration = Duration::from_millis(150);

/// Per-poll reply budget during detection.
const DETECT_POLL_TIMEOUT: Duration = Duration::from_millis(300);

/// PN532 reader driver over a [`BusLink`].
pub struct Pn532<L: BusLink> {
    transport: Transport<L>,
    bus_timeout: Duration,
    sam_configured: bool,
    active_target: Option<TagUid>,
}

impl<L: BusLink> Pn532<L> {
    /// Wrap a bus link in a driver.
    ///
    /// `bus_timeout` is the per-exchange reply budget for everything
    /// except detection polling, which uses its own short window.
    pub fn new(link: L, retry: RetryPolicy, bus_timeout: Duration) -> Self {
        Self {
            transport: Transport::new(link, retry),
            bus_timeout,
            sam_configured: false,
            active_target: None,
        }
    }

    /// The UID currently addressed on the bus, if any.
    pub fn active_target(&self) -> Option<&TagUid> {
        self.active_target.as_ref()
    }

    async fn command(
        &mut self,
        cmd: u8,
        data: &[u8],
        expected_data_len: usize,
        budget: Duration,
    ) -> std::result::Result<Vec<u8>, BusError> {
        let request = frame::build_command(cmd, data);
        let payload = self
            .transport
            .exchange(&request, expected_data_len, budget)
            .await?;
        if payload.first() != Some(&cmd.wrapping_add(1)) {
            return Err(BusError::Garbled(format!(
                "expected response code {:#04x}, got {:?}",
                cmd.wrapping_add(1),
                payload.first()
            )));
        }
        Ok(payload[1..].to_vec())
    }

    /// Query the chip's firmware version.
    ///
    /// One exchange; doubles as the startup liveness probe.
    pub async fn get_firmware_version(&mut self) -> Result<FirmwareVersion> {
        let data = self
            .command(CMD_GET_FIRMWARE_VERSION, &[], 4, self.bus_timeout)
            .await?;
        if data.len() < 4 {
            return Err(DriverError::Bus(BusError::Garbled(format!(
                "firmware reply too short ({} bytes)",
                data.len()
            ))));
        }
        let version = FirmwareVersion {
            ic: data[0],
            version: data[1],
            revision: data[2],
            support: data[3],
        };
        debug!(ic = format_args!("{:#04x}", version.ic), %version, "PN532 firmware");
        Ok(version)
    }

    /// Configure the security access module for normal operation.
    ///
    /// Required once after power-up before any tag operation;
    /// subsequent calls are no-ops.
    pub async fn configure_security_module(&mut self) -> Result<()> {
        if self.sam_configured {
            trace!("SAM already configured");
            return Ok(());
        }
        // Normal mode, 50ms virtual-card timeout, IRQ enabled.
        self.command(CMD_SAM_CONFIGURATION, &[0x01, 0x14, 0x01], 0, self.bus_timeout)
            .await?;
        self.sam_configured = true;
        debug!("SAM configured");
        Ok(())
    }

    /// Poll for a tag until one responds or `timeout` elapses.
    ///
    /// Returns `Ok(None)` on timeout with no tag in the field; an empty
    /// field is not an error. The chip ACKs the listing command and then
    /// withholds its response frame while no target is present, so only
    /// a post-ACK reply timeout means "nothing yet". A missing ACK is a
    /// dead bus and escalates like any other fault.
    pub async fn detect_tag(&mut self, timeout: Duration) -> Result<Option<TagUid>> {
        let started = tokio::time::Instant::now();

        loop {
            let remaining = timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Ok(None);
            }

            let budget = DETECT_POLL_TIMEOUT.min(remaining);
            match self
                .command(
                    CMD_IN_LIST_PASSIVE_TARGET,
                    &[TARGET_1, BAUD_106_TYPE_A],
                    16,
                    budget,
                )
                .await
            {
                Ok(data) => {
                    if let Some(uid) = parse_target(&data)? {
                        debug!(%uid, "tag detected");
                        self.active_target = Some(uid.clone());
                        return Ok(Some(uid));
                    }
                }
                Err(BusError::Timeout) => {
                    trace!("no target reply this poll");
                }
                Err(e) => return Err(e.into()),
            }

            tokio::time::sleep(DETECT_POLL_INTERVAL.min(remaining)).await;
        }
    }

    /// Select the detected tag for page IO.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotPresent`] when no tag is addressed or
    /// `uid` is not the tag that was detected.
    pub async fn select_tag(&mut self, uid: &TagUid) -> Result<()> {
        match &self.active_target {
            Some(active) if active == uid => {}
            _ => return Err(DriverError::NotPresent),
        }
        let data = self
            .command(CMD_IN_SELECT, &[TARGET_1], 1, self.bus_timeout)
            .await?;
        check_status(&data)?;
        trace!(%uid, "tag selected");
        Ok(())
    }

    /// Read four pages starting at `page` (16 bytes).
    pub async fn read_page(&mut self, page: u8) -> Result<Vec<u8>> {
        if self.active_target.is_none() {
            return Err(DriverError::NotPresent);
        }
        let data = self
            .command(
                CMD_IN_DATA_EXCHANGE,
                &[TARGET_1, NTAG_CMD_READ, page],
                1 + READ_CHUNK,
                self.bus_timeout,
            )
            .await?;
        check_status(&data)?;
        if data.len() < 1 + READ_CHUNK {
            return Err(DriverError::Bus(BusError::Garbled(format!(
                "short read reply for page {page} ({} bytes)",
                data.len()
            ))));
        }
        Ok(data[1..1 + READ_CHUNK].to_vec())
    }

    /// Write one 4-byte page.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::WriteRejected`] when the tag refuses the
    /// write, for example on a locked page.
    pub async fn write_page(&mut self, page: u8, data: &[u8; PAGE_SIZE]) -> Result<()> {
        if self.active_target.is_none() {
            return Err(DriverError::NotPresent);
        }
        let mut payload = vec![TARGET_1, NTAG_CMD_WRITE, page];
        payload.extend_from_slice(data);
        let reply = self
            .command(CMD_IN_DATA_EXCHANGE, &payload, 1, self.bus_timeout)
            .await?;
        match reply.first() {
            Some(0x00) => {
                trace!(page, "page written");
                Ok(())
            }
            Some(&status) if status & 0x3F == 0x01 => Err(DriverError::NotPresent),
            Some(&status) => Err(DriverError::WriteRejected { page, status }),
            None => Err(DriverError::Bus(BusError::Garbled(
                "empty write reply".into(),
            ))),
        }
    }

    /// Release the addressed tag and return the bus to idle.
    ///
    /// Always callable; hardware complaints are logged and swallowed so
    /// every exit path of a write can release unconditionally.
    pub async fn release(&mut self) {
        if self.active_target.is_none() {
            return;
        }
        match self
            .command(CMD_IN_RELEASE, &[0x00], 1, self.bus_timeout)
            .await
        {
            Ok(_) => trace!("tag released"),
            Err(e) => warn!(error = %e, "release failed, dropping target anyway"),
        }
        self.active_target = None;
    }
}

/// Parse an `InListPassiveTarget` reply into the detected UID, if any.
fn parse_target(data: &[u8]) -> Result<Option<TagUid>> {
    // [NbTg, Tg, SENS_RES(2), SEL_RES, NFCIDLength, NFCID1...]
    match data.first() {
        None | Some(0) => Ok(None),
        Some(_) => {
            if data.len() < 6 {
                return Err(DriverError::Bus(BusError::Garbled(
                    "truncated target info".into(),
                )));
            }
            let uid_len = data[5] as usize;
            let uid_bytes = data
                .get(6..6 + uid_len)
                .ok_or_else(|| DriverError::Bus(BusError::Garbled("truncated UID".into())))?;
            let uid = TagUid::new(uid_bytes.to_vec()).map_err(|e| {
                DriverError::Bus(BusError::Garbled(format!("invalid UID in reply: {e}")))
            })?;
            Ok(Some(uid))
        }
    }
}

/// Interpret the status byte of an `InDataExchange`/`InSelect` reply.
fn check_status(data: &[u8]) -> Result<()> {
    match data.first() {
        Some(0x00) => Ok(()),
        // 0x01 is the chip's target-timeout: the tag left the field.
        Some(&status) if status & 0x3F == 0x01 => Err(DriverError::NotPresent),
        Some(&status) => Err(DriverError::Bus(BusError::Garbled(format!(
            "tag command failed with status {status:#04x}"
        )))),
        None => Err(DriverError::Bus(BusError::Garbled("empty reply".into()))),
    }
}
