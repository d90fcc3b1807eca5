// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Printgate print gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Owning user of a queue document or print request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Billing account charged for a print request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a gateway-side print request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classification of a print request at entry.
///
/// This is not a persisted state machine — it tells the dispatcher which
/// path a request takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrintMode {
    /// Send immediately, minimal interaction.
    Fast,
    /// Send immediately after automatic settings resolution.
    Auto,
    /// Place in the hold queue for later release; no physical send now.
    Hold,
    /// Place in the job-ticket store for operator release; no send now.
    Ticket,
    /// Ticket copy-job release: record the print event, no physical send.
    TicketCopy,
    /// Ticket normal release settlement: record the event, no physical send.
    TicketEnd,
}

impl PrintMode {
    /// Whether this request performs a physical protocol send now.
    pub fn is_direct_send(self) -> bool {
        matches!(self, Self::Fast | Self::Auto)
    }

    /// Whether this request is queued for later release.
    pub fn is_queued(self) -> bool {
        matches!(self, Self::Hold | Self::Ticket)
    }

    /// Whether this request settles an already-produced job without sending.
    pub fn is_settlement(self) -> bool {
        matches!(self, Self::TicketCopy | Self::TicketEnd)
    }
}

/// Which part of the user's queue is consumed after a successful print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClearScope {
    /// Leave the queue untouched.
    None,
    /// Remove only the pages that were printed.
    Pages,
    /// Remove the source jobs whose pages were printed.
    Jobs,
    /// Clear the whole queue.
    All,
}

/// Paper / media keyword, e.g. `iso_a4_210x297mm` (RFC 8011 §5.2.13 values).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Media(pub String);

impl Media {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The physical tray or bin a device draws paper from, distinct from media
/// size/type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaSource {
    /// Device picks the tray itself.
    Auto,
    /// Manual feed slot.
    Manual,
    /// A specific named tray.
    Tray(String),
}

impl MediaSource {
    /// IPP `media-source` keyword.
    pub fn ipp_keyword(&self) -> &str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
            Self::Tray(name) => name,
        }
    }
}

/// Page scaling applied when document and media sizes differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageScaling {
    /// Print at original size.
    None,
    /// Scale down or up to fit the media.
    Fit,
    /// Scale up only, cropping overflow.
    Expand,
}

impl PageScaling {
    /// IPP `print-scaling` keyword (PWG 5100.13).
    pub fn ipp_keyword(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Fit => "fit",
            Self::Expand => "fill",
        }
    }
}

/// IPP `job-state` values (RFC 8011 §5.3.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IppJobState {
    Pending,
    PendingHeld,
    Processing,
    ProcessingStopped,
    Canceled,
    Aborted,
    Completed,
}

impl IppJobState {
    /// Decode the wire enum value; `None` for out-of-range values.
    pub fn from_enum_value(value: i32) -> Option<Self> {
        match value {
            3 => Some(Self::Pending),
            4 => Some(Self::PendingHeld),
            5 => Some(Self::Processing),
            6 => Some(Self::ProcessingStopped),
            7 => Some(Self::Canceled),
            8 => Some(Self::Aborted),
            9 => Some(Self::Completed),
            _ => None,
        }
    }

    /// Wire enum value.
    pub fn enum_value(self) -> i32 {
        match self {
            Self::Pending => 3,
            Self::PendingHeld => 4,
            Self::Processing => 5,
            Self::ProcessingStopped => 6,
            Self::Canceled => 7,
            Self::Aborted => 8,
            Self::Completed => 9,
        }
    }

    /// Whether the device will never touch this job again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Canceled | Self::Aborted | Self::Completed)
    }
}

/// The result of one successful protocol send: a job physically queued on
/// the device side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchedJob {
    /// Integer job-id assigned by the print server.
    pub job_id: i32,
    pub state: IppJobState,
    pub created_at: DateTime<Utc>,
    /// Set once the job reaches a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Human-readable title shown in the device queue.
    pub title: String,
    /// The user the job was submitted on behalf of.
    pub user: UserId,
}

/// Cost computed for one chunk (or one whole request) by the cost
/// collaborator. Amounts are integer cents to keep arithmetic exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostResult {
    pub cents: i64,
    pub pages: u32,
    pub sheets: u32,
}

impl CostResult {
    pub const ZERO: CostResult = CostResult {
        cents: 0,
        pages: 0,
        sheets: 0,
    };

    /// Component-wise sum, used for the account-wide affordability check.
    pub fn accumulate(self, other: CostResult) -> CostResult {
        CostResult {
            cents: self.cents + other.cents,
            pages: self.pages + other.pages,
            sheets: self.sheets + other.sheets,
        }
    }
}
