//! In-memory PN532 stand-in for tests.
//!
//! [`MockBus`] implements [`BusLink`] by parsing the host frames the
//! driver sends and answering like a chip with a simulated tag in its
//! field. A paired [`MockBusHandle`] places and removes tags, injects
//! bus and tag faults, and counts exchanges, so every failure path of
//! the driver and everything above it can be exercised without
//! hardware.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tagdock_core::constants::{CC_PAGE, NTAG215_CC, PAGE_SIZE, TAG_PAGES};
use tagdock_core::TagUid;

use crate::bus::BusLink;
use crate::error::BusError;
use crate::frame::{self, ACK_FRAME, TFI_HOST_TO_CHIP};

const CMD_GET_FIRMWARE_VERSION: u8 = 0x02;
const CMD_SAM_CONFIGURATION: u8 = 0x14;
const CMD_IN_LIST_PASSIVE_TARGET: u8 = 0x4A;
const CMD_IN_DATA_EXCHANGE: u8 = 0x40;
const CMD_IN_SELECT: u8 = 0x54;
const CMD_IN_RELEASE: u8 = 0x52;

const NTAG_CMD_READ: u8 = 0x30;
const NTAG_CMD_WRITE: u8 = 0xA2;

/// Firmware identity the mock reports: PN532 v1.6.
const MOCK_FIRMWARE: [u8; 4] = [0x32, 0x01, 0x06, 0x07];

/// A simulated 135-page tag.
#[derive(Debug, Clone)]
pub struct MockTag {
    uid: TagUid,
    pages: [[u8; PAGE_SIZE]; TAG_PAGES],
}

impl MockTag {
    /// A factory-blank tag: all pages zero, including the capability
    /// container.
    pub fn blank(uid: TagUid) -> Self {
        Self {
            uid,
            pages: [[0u8; PAGE_SIZE]; TAG_PAGES],
        }
    }

    /// A formatted NTAG215.
    pub fn ntag215(uid: TagUid) -> Self {
        let mut tag = Self::blank(uid);
        tag.pages[CC_PAGE as usize] = NTAG215_CC;
        tag
    }

    /// A tag with an arbitrary capability container, for wrong-type
    /// scenarios.
    pub fn with_cc(uid: TagUid, cc: [u8; PAGE_SIZE]) -> Self {
        let mut tag = Self::blank(uid);
        tag.pages[CC_PAGE as usize] = cc;
        tag
    }

    pub fn uid(&self) -> &TagUid {
        &self.uid
    }

    pub fn page(&self, page: u8) -> [u8; PAGE_SIZE] {
        self.pages[page as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BusFaultMode {
    None,
    /// Swallow commands entirely; the host sees no ACK.
    Silent,
    /// Acknowledge but never answer; the host times out on the reply.
    AckOnly,
    /// Answer with bytes that parse as no frame at all.
    Garble,
}

#[derive(Debug)]
struct Shared {
    tag: Option<MockTag>,
    exchanges: u64,
    fault: BusFaultMode,
    reject_write_page: Option<u8>,
    corrupt_read_page: Option<u8>,
}

/// Test-side controls for a [`MockBus`].
#[derive(Clone)]
pub struct MockBusHandle {
    shared: Arc<Mutex<Shared>>,
}

impl MockBusHandle {
    /// Place a tag in the field.
    pub fn insert_tag(&self, tag: MockTag) {
        self.lock().tag = Some(tag);
    }

    /// Remove whatever tag is in the field and return it for
    /// inspection.
    pub fn remove_tag(&self) -> Option<MockTag> {
        self.lock().tag.take()
    }

    /// Read a page of the in-field tag without going over the bus.
    pub fn tag_page(&self, page: u8) -> Option<[u8; PAGE_SIZE]> {
        self.lock().tag.as_ref().map(|t| t.page(page))
    }

    /// Number of command frames the chip has received.
    pub fn exchanges(&self) -> u64 {
        self.lock().exchanges
    }

    /// Drop all traffic until [`clear_faults`](Self::clear_faults).
    pub fn go_silent(&self) {
        self.lock().fault = BusFaultMode::Silent;
    }

    /// Acknowledge commands but never reply.
    pub fn ack_only(&self) {
        self.lock().fault = BusFaultMode::AckOnly;
    }

    /// Reply with garbage bytes.
    pub fn garble(&self) {
        self.lock().fault = BusFaultMode::Garble;
    }

    /// Make the tag refuse writes to one page.
    pub fn reject_writes_to(&self, page: u8) {
        self.lock().reject_write_page = Some(page);
    }

    /// Corrupt read-backs of one page, leaving the stored data intact.
    pub fn corrupt_reads_of(&self, page: u8) {
        self.lock().corrupt_read_page = Some(page);
    }

    /// Restore normal behaviour.
    pub fn clear_faults(&self) {
        let mut shared = self.lock();
        shared.fault = BusFaultMode::None;
        shared.reject_write_page = None;
        shared.corrupt_read_page = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// The bus side of the pair; hand this to the driver.
pub struct MockBus {
    shared: Arc<Mutex<Shared>>,
    pending: VecDeque<Vec<u8>>,
}

/// Create a connected bus and handle. The field starts empty.
pub fn mock_bus() -> (MockBus, MockBusHandle) {
    let shared = Arc::new(Mutex::new(Shared {
        tag: None,
        exchanges: 0,
        fault: BusFaultMode::None,
        reject_write_page: None,
        corrupt_read_page: None,
    }));
    (
        MockBus {
            shared: Arc::clone(&shared),
            pending: VecDeque::new(),
        },
        MockBusHandle { shared },
    )
}

impl BusLink for MockBus {
    async fn transmit(&mut self, frame: &[u8]) -> Result<(), BusError> {
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        shared.exchanges += 1;

        match shared.fault {
            BusFaultMode::Silent => return Ok(()),
            BusFaultMode::AckOnly => {
                self.pending.push_back(ACK_FRAME.to_vec());
                return Ok(());
            }
            BusFaultMode::Garble => {
                self.pending.push_back(ACK_FRAME.to_vec());
                self.pending.push_back(vec![0xDE, 0xAD, 0xBE, 0xEF]);
                return Ok(());
            }
            BusFaultMode::None => {}
        }

        let Some((cmd, data)) = parse_host_frame(frame) else {
            // A real chip stays quiet on a frame it cannot checksum.
            return Ok(());
        };

        self.pending.push_back(ACK_FRAME.to_vec());
        if let Some(reply) = shared.respond(cmd, &data) {
            self.pending.push_back(frame::build_response(
                cmd.wrapping_add(1),
                &reply,
            ));
        }
        Ok(())
    }

    async fn receive(&mut self, _max_len: usize, _timeout: Duration) -> Result<Vec<u8>, BusError> {
        match self.pending.pop_front() {
            Some(bytes) => Ok(bytes),
            None => Err(BusError::Timeout),
        }
    }
}

impl Shared {
    /// Build the data portion of the chip's reply, or `None` when the
    /// chip would hold its answer.
    fn respond(&mut self, cmd: u8, data: &[u8]) -> Option<Vec<u8>> {
        match cmd {
            CMD_GET_FIRMWARE_VERSION => Some(MOCK_FIRMWARE.to_vec()),
            CMD_SAM_CONFIGURATION => Some(Vec::new()),
            CMD_IN_LIST_PASSIVE_TARGET => match &self.tag {
                Some(tag) => {
                    let uid = tag.uid.as_bytes();
                    let mut reply = vec![0x01, 0x01, 0x00, 0x44, 0x00, uid.len() as u8];
                    reply.extend_from_slice(uid);
                    Some(reply)
                }
                // No target: the chip waits for one indefinitely.
                None => None,
            },
            CMD_IN_SELECT => match &self.tag {
                Some(_) => Some(vec![0x00]),
                None => Some(vec![0x01]),
            },
            CMD_IN_DATA_EXCHANGE => self.data_exchange(data),
            CMD_IN_RELEASE => Some(vec![0x00]),
            _ => None,
        }
    }

    fn data_exchange(&mut self, data: &[u8]) -> Option<Vec<u8>> {
        if self.tag.is_none() {
            return Some(vec![0x01]);
        }
        match data.get(1)? {
            &NTAG_CMD_READ => {
                let page = *data.get(2)?;
                let corrupt = self.corrupt_read_page;
                let tag = self.tag.as_ref()?;
                let mut reply = vec![0x00];
                for offset in 0..4u8 {
                    let index = page.wrapping_add(offset);
                    let mut chunk = if (index as usize) < TAG_PAGES {
                        tag.page(index)
                    } else {
                        [0u8; PAGE_SIZE]
                    };
                    if corrupt == Some(index) {
                        for byte in &mut chunk {
                            *byte ^= 0xFF;
                        }
                    }
                    reply.extend_from_slice(&chunk);
                }
                Some(reply)
            }
            &NTAG_CMD_WRITE => {
                let page = *data.get(2)?;
                let bytes = data.get(3..3 + PAGE_SIZE)?;
                if self.reject_write_page == Some(page) {
                    return Some(vec![0x05]);
                }
                if (page as usize) >= TAG_PAGES {
                    return Some(vec![0x05]);
                }
                let tag = self.tag.as_mut()?;
                tag.pages[page as usize].copy_from_slice(bytes);
                Some(vec![0x00])
            }
            _ => Some(vec![0x27]),
        }
    }
}

/// Pull the command byte and data out of a host frame, verifying both
/// checksums like the chip does.
fn parse_host_frame(frame: &[u8]) -> Option<(u8, Vec<u8>)> {
    let start = frame
        .windows(2)
        .position(|w| w == [0x00, 0xFF])?;
    let len = *frame.get(start + 2)? as usize;
    let lcs = *frame.get(start + 3)?;
    if (len as u8).wrapping_add(lcs) != 0 || len < 2 {
        return None;
    }
    let body = frame.get(start + 4..start + 4 + len)?;
    let dcs = *frame.get(start + 4 + len)?;
    let sum: u8 = body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if sum.wrapping_add(dcs) != 0 || body[0] != TFI_HOST_TO_CHIP {
        return None;
    }
    Some((body[1], body[2..].to_vec()))
}
