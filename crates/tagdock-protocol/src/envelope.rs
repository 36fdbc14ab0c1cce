//! Wire-level request and response shapes.
//!
//! One JSON object per line in each direction. Requests carry a
//! `command` discriminator plus the arguments that command needs;
//! responses carry a `status` of `ok` or `error`, a command-specific
//! `data` payload, and a human-readable `message` on errors.

use serde::{Deserialize, Serialize};

use tagdock_core::{TagUid, WriteOutcome};

/// Reported as the write outcome when the reader is already held by
/// another write.
pub const BUSY_OUTCOME: &str = "busy";

/// A client command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Request {
    /// List payload categories.
    ListCategories,
    /// List payloads within one category.
    ListPayloads { category: String },
    /// Write one payload to a tag; blocks until the write concludes.
    Write { category: String, name: String },
    /// Report reader health and firmware.
    Status,
    /// Rescan the payload tree.
    Reload,
}

/// A service reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// Command-specific payload of an `ok` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ResponseData {
    /// Category or payload names, ordered.
    Names(Vec<String>),
    Write(WriteReport),
    Status(StatusReport),
    Reload(ReloadReport),
}

/// Terminal result of a `write` command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WriteReport {
    /// `success`, `no_tag`, `wrong_tag_type`, `write_rejected`,
    /// `verification_failed`, `bus_fault`, or `busy`.
    pub outcome: String,
    /// UID of the written tag, uppercase hex, on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Page a rejection or verification mismatch happened on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u8>,
}

/// Result of a `status` command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusReport {
    /// Firmware version probed at startup, `null` when the probe
    /// failed.
    pub firmware_version: Option<String>,
    pub hardware_ready: bool,
}

/// Result of a `reload` command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReloadReport {
    pub categories: usize,
    pub payloads: usize,
}

impl Response {
    fn ok(data: ResponseData) -> Self {
        Self {
            status: Status::Ok,
            data: Some(data),
            message: None,
        }
    }

    pub fn names(names: Vec<String>) -> Self {
        Self::ok(ResponseData::Names(names))
    }

    /// Fold a finished write into the wire shape: outcome name plus
    /// the UID on success and the page on page-level failures.
    pub fn write_report(outcome: &WriteOutcome, uid: Option<&TagUid>) -> Self {
        let page = match outcome {
            WriteOutcome::WriteRejected { page } | WriteOutcome::VerificationFailed { page } => {
                Some(*page)
            }
            _ => None,
        };
        Self::ok(ResponseData::Write(WriteReport {
            outcome: outcome.wire_name().to_string(),
            uid: if outcome.is_success() {
                uid.map(TagUid::to_hex)
            } else {
                None
            },
            page,
        }))
    }

    /// The write never started because the reader is held.
    pub fn write_busy() -> Self {
        Self::ok(ResponseData::Write(WriteReport {
            outcome: BUSY_OUTCOME.to_string(),
            uid: None,
            page: None,
        }))
    }

    pub fn hardware_status(firmware_version: Option<String>, hardware_ready: bool) -> Self {
        Self::ok(ResponseData::Status(StatusReport {
            firmware_version,
            hardware_ready,
        }))
    }

    pub fn reloaded(categories: usize, payloads: usize) -> Self {
        Self::ok(ResponseData::Reload(ReloadReport {
            categories,
            payloads,
        }))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            data: None,
            message: Some(message.into()),
        }
    }
}
