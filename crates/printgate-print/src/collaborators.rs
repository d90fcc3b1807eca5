// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Collaborator seams consumed by the dispatcher.
//
// Costing, balance checks, access control, PDF rendering, retention
// storage, hold/ticket queues, external settlement, and completion
// notification all live outside this crate.  The dispatcher talks to them
// through these traits so production wiring and test doubles plug in the
// same way.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use printgate_core::error::Result;
use printgate_core::types::{AccountId, CostResult, PrintMode, RequestId, UserId};
use printgate_inbox::RangeAtom;

use crate::registry::CachedPrinter;

/// Cost-relevant parameters of one chunk send.
#[derive(Debug, Clone)]
pub struct CostParams {
    pub pages: u32,
    pub sheets: u32,
    pub copies: u32,
    pub color: bool,
    pub media: String,
}

/// What a PDF render of a chunk needs.
#[derive(Debug, Clone)]
pub struct RenderSpec {
    pub user: UserId,
    /// Source job files, referenced by the range entries' job indices.
    pub files: Vec<PathBuf>,
    /// Job-local intervals to render, in view order.
    pub ranges: Vec<(usize, RangeAtom)>,
    pub landscape: bool,
}

/// Banner sheet of a job-ticket release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BannerPosition {
    Start,
    End,
}

#[derive(Debug, Clone)]
pub struct JobSheetSpec {
    pub position: BannerPosition,
    pub title: String,
    pub user: UserId,
    pub printer: String,
    pub when: DateTime<Utc>,
    /// Language of the rendered banner text.
    pub locale: String,
}

/// Retention category of a stored PDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoredKind {
    /// Long-term archive copy, per site policy.
    Archive,
    /// Short-lived journal copy for reprint/audit.
    Journal,
}

/// One print event as recorded against the accounting log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintLogEntry {
    pub request_id: RequestId,
    pub user: UserId,
    pub account: AccountId,
    pub printer: String,
    pub job_name: String,
    pub mode: PrintMode,
    pub pages: u32,
    pub sheets: u32,
    pub copies: u32,
    pub cost: CostResult,
    /// Device job ids, in dispatch order.
    pub device_jobs: Vec<i32>,
    /// SHA-256 of each dispatched chunk PDF (hex), in dispatch order.
    /// Lets the journal verify a retained copy against what went out.
    pub pdf_digests: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait CostCalculator: Send + Sync {
    async fn calc(
        &self,
        user: &UserId,
        printer: &CachedPrinter,
        params: &CostParams,
    ) -> Result<CostResult>;
}

#[async_trait]
pub trait BalanceValidator: Send + Sync {
    /// Whether the account can afford the given total.
    async fn is_sufficient(&self, account: &AccountId, total: &CostResult) -> Result<bool>;
}

#[async_trait]
pub trait AccessControl: Send + Sync {
    async fn is_granted(&self, printer: &CachedPrinter, user: &UserId) -> Result<bool>;
}

#[async_trait]
pub trait PdfGenerator: Send + Sync {
    /// Render the chunk's pages into a single PDF.
    async fn generate(&self, spec: &RenderSpec) -> Result<Vec<u8>>;

    /// Render a one-page banner sheet for a job-ticket release.
    async fn banner(&self, spec: &JobSheetSpec) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Persist a dispatched PDF under the given retention category.
    async fn store(&self, kind: StoredKind, log: &PrintLogEntry, pdf: &[u8]) -> Result<()>;
}

#[async_trait]
pub trait HoldReleaseStore: Send + Sync {
    /// Park a hold/ticket request for later release by the outbox
    /// scheduler.  No physical send happens here.
    async fn enqueue(&self, log: &PrintLogEntry, pdf_path: &std::path::Path) -> Result<()>;
}

#[async_trait]
pub trait ExternalSettlement: Send + Sync {
    /// Settle a print event against the external management system of the
    /// printer.  Only called for externally managed devices.
    async fn settle(&self, log: &PrintLogEntry) -> Result<()>;
}

#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn notify(&self, log: &PrintLogEntry) -> Result<()>;
}

/// The full collaborator set, wired once at process startup.
#[derive(Clone)]
pub struct Collaborators {
    pub cost: Arc<dyn CostCalculator>,
    pub balance: Arc<dyn BalanceValidator>,
    pub access: Arc<dyn AccessControl>,
    pub generator: Arc<dyn PdfGenerator>,
    pub document_store: Arc<dyn DocumentStore>,
    pub hold_store: Arc<dyn HoldReleaseStore>,
    pub settlement: Arc<dyn ExternalSettlement>,
    pub notifier: Arc<dyn CompletionNotifier>,
}
