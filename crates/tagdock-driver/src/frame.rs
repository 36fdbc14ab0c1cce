//! PN532 wire framing.
//!
//! Every host command and chip reply travels in the same envelope:
//!
//! ```text
//! 00 00 FF | LEN LCS | TFI CMD DATA... | DCS 00
//! ```
//!
//! `LEN` counts `TFI` through the last data byte, `LCS` is its two's
//! complement, and `DCS` is the two's complement of the sum of `TFI`,
//! `CMD` and the data. `TFI` is `0xD4` host-to-chip and `0xD5`
//! chip-to-host. A command is acknowledged with the fixed six-byte ACK
//! frame before the reply frame follows.
//!
//! This module only builds and validates envelopes; it attaches no
//! meaning to the command bytes inside them.

use crate::error::BusError;

/// Frame preamble byte.
pub const PREAMBLE: u8 = 0x00;

/// Two-byte start-of-frame code.
pub const START_CODE: [u8; 2] = [0x00, 0xFF];

/// Frame postamble byte.
pub const POSTAMBLE: u8 = 0x00;

/// Frame identifier for host-to-chip traffic.
pub const TFI_HOST_TO_CHIP: u8 = 0xD4;

/// Frame identifier for chip-to-host traffic.
pub const TFI_CHIP_TO_HOST: u8 = 0xD5;

/// The fixed ACK frame the chip sends after a well-formed command.
pub const ACK_FRAME: [u8; 6] = [0x00, 0x00, 0xFF, 0x00, 0xFF, 0x00];

/// Envelope bytes around the data payload of a response frame
/// (preamble, start code, LEN, LCS, TFI, response code, DCS,
/// postamble).
pub const FRAME_OVERHEAD: usize = 9;

fn checksum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |acc, b| acc.wrapping_add(*b))
        .wrapping_neg()
}

/// Build a host-to-chip command frame.
///
/// # Examples
///
/// ```
/// use tagdock_driver::frame::build_command;
///
/// // GetFirmwareVersion is the canonical liveness probe.
/// let frame = build_command(0x02, &[]);
/// assert_eq!(frame, [0x00, 0x00, 0xFF, 0x02, 0xFE, 0xD4, 0x02, 0x2A, 0x00]);
/// ```
pub fn build_command(cmd: u8, data: &[u8]) -> Vec<u8> {
    build_frame(TFI_HOST_TO_CHIP, cmd, data)
}

/// Build a chip-to-host response frame.
///
/// The chip side of the protocol; used by the mock bus and by framing
/// tests.
pub fn build_response(code: u8, data: &[u8]) -> Vec<u8> {
    build_frame(TFI_CHIP_TO_HOST, code, data)
}

fn build_frame(tfi: u8, cmd: u8, data: &[u8]) -> Vec<u8> {
    let len = (data.len() + 2) as u8;
    let mut frame = Vec::with_capacity(data.len() + FRAME_OVERHEAD);
    frame.push(PREAMBLE);
    frame.extend_from_slice(&START_CODE);
    frame.push(len);
    frame.push(len.wrapping_neg());
    frame.push(tfi);
    frame.push(cmd);
    frame.extend_from_slice(data);
    let mut dcs = tfi.wrapping_add(cmd);
    for b in data {
        dcs = dcs.wrapping_add(*b);
    }
    frame.push(dcs.wrapping_neg());
    frame.push(POSTAMBLE);
    frame
}

/// Whether `bytes` contains the ACK frame.
///
/// Leading noise bytes before the start code are tolerated, matching
/// how the chip pads replies on some bus variants.
pub fn is_ack(bytes: &[u8]) -> bool {
    bytes
        .windows(ACK_FRAME.len())
        .any(|w| w == ACK_FRAME)
}

/// Validate a chip-to-host frame and return its body without the TFI:
/// `[response_code, data...]`.
///
/// # Errors
///
/// Returns [`BusError::Garbled`] when the start code is missing, a
/// checksum fails, the frame is truncated, or the TFI is not
/// chip-to-host.
pub fn parse_response(bytes: &[u8]) -> Result<Vec<u8>, BusError> {
    let start = bytes
        .windows(2)
        .position(|w| w == START_CODE)
        .ok_or_else(|| BusError::Garbled("missing start code".into()))?;

    let header = &bytes[start + 2..];
    if header.len() < 2 {
        return Err(BusError::Garbled("truncated length field".into()));
    }
    let len = header[0] as usize;
    let lcs = header[1];
    if (header[0].wrapping_add(lcs)) != 0 {
        return Err(BusError::Garbled("length checksum mismatch".into()));
    }
    if len < 2 {
        return Err(BusError::Garbled(format!("frame body too short ({len})")));
    }

    let body = &header[2..];
    if body.len() < len + 1 {
        return Err(BusError::Garbled("truncated frame body".into()));
    }
    let (payload, rest) = body.split_at(len);
    if checksum(payload) != rest[0] {
        return Err(BusError::Garbled("data checksum mismatch".into()));
    }
    if payload[0] != TFI_CHIP_TO_HOST {
        return Err(BusError::Garbled(format!(
            "unexpected TFI {:#04x}",
            payload[0]
        )));
    }

    Ok(payload[1..].to_vec())
}
