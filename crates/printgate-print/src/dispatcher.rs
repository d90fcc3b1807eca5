// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print dispatcher — turns a print intent into device jobs.
//
// Fast/Auto intents (and releases of held/ticketed jobs) go through the
// direct-send sequence: resolve the printer, check access, cost the whole
// request, affordability-check the account-wide total, then send each
// chunk.  Hold/Ticket intents are parked for later release without a send.
// TicketCopy/TicketEnd are settlement paths that record the print event
// without a physical send.
//
// A chunk failure aborts the remaining chunks but never retracts chunks
// already dispatched: a physically queued device job cannot be un-sent.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use printgate_core::config::GatewayConfig;
use printgate_core::error::{GatewayError, Result};
use printgate_core::types::{
    AccountId, ClearScope, CostResult, DispatchedJob, PrintMode, RequestId, UserId,
};
use printgate_inbox::chunker::JobChunk;
use printgate_inbox::{ranges, InboxStore, RangeAtom};

use crate::collaborators::{
    BannerPosition, Collaborators, CostParams, JobSheetSpec, PrintLogEntry, RenderSpec, StoredKind,
};
use crate::ipp_client::{JobProtocol, SendJobRequest};
use crate::pdf_prep::{self, ScopedPdf};
use crate::registry::{CachedPrinter, PrinterRegistry};

/// Where the PDF bytes of a request come from.
#[derive(Debug, Clone)]
pub enum PdfSource {
    /// The filtered document is already rendered; chunks take consecutive
    /// page windows out of it.
    Rendered(Vec<u8>),
    /// Each chunk is rendered on demand from the user's source job files.
    Render {
        files: Vec<PathBuf>,
        landscape: bool,
    },
}

/// One print request, as assembled by the interactive endpoint or the
/// outbox scheduler.  Immutable for the whole dispatch; every protocol call
/// builds its own [`SendJobRequest`] rather than mutating shared state.
#[derive(Debug, Clone)]
pub struct PrintIntent {
    pub request_id: RequestId,
    pub user: UserId,
    pub account: AccountId,
    pub printer: String,
    pub mode: PrintMode,
    pub job_name: String,
    pub copies: u32,
    pub collate: bool,
    pub grayscale: bool,
    /// Extra IPP job-template options (keyword values).  Chunk media
    /// assignments override the media-related keys per chunk.
    pub options: BTreeMap<String, String>,
    /// Pre-computed chunks.  Empty means the whole rendered document is one
    /// implicit chunk.
    pub chunks: Vec<JobChunk>,
    pub source: PdfSource,
    /// Emit banner sheets around the main send (ticket releases).
    pub job_sheets: bool,
    pub locale: String,
}

/// Outcome of a successful dispatch.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub log: PrintLogEntry,
    pub jobs: Vec<DispatchedJob>,
}

pub struct PrintDispatcher {
    registry: Arc<PrinterRegistry>,
    protocol: Arc<dyn JobProtocol>,
    inbox: Arc<InboxStore>,
    collaborators: Collaborators,
    config: GatewayConfig,
}

impl PrintDispatcher {
    pub fn new(
        registry: Arc<PrinterRegistry>,
        protocol: Arc<dyn JobProtocol>,
        inbox: Arc<InboxStore>,
        collaborators: Collaborators,
        config: GatewayConfig,
    ) -> Self {
        Self {
            registry,
            protocol,
            inbox,
            collaborators,
            config,
        }
    }

    /// Execute one print intent.
    ///
    /// Callers must hold the per-user queue lock: two concurrent dispatches
    /// against the same user's queue are not serialized here.
    #[instrument(skip(self, intent), fields(user = %intent.user, printer = %intent.printer, mode = ?intent.mode))]
    pub async fn dispatch(&self, intent: PrintIntent) -> Result<DispatchReport> {
        let printer = self.resolve_printer(&intent.printer).await?;

        if !printer.accepting_jobs {
            return Err(GatewayError::AccessDenied(format!(
                "printer '{}' is not accepting jobs",
                printer.display_name
            )));
        }
        if !self
            .collaborators
            .access
            .is_granted(&printer, &intent.user)
            .await?
        {
            return Err(GatewayError::AccessDenied(format!(
                "user '{}' may not print to '{}'",
                intent.user, printer.display_name
            )));
        }

        match intent.mode {
            PrintMode::Fast | PrintMode::Auto => self.direct_send(intent, &printer).await,
            PrintMode::Hold | PrintMode::Ticket => self.enqueue(intent, &printer).await,
            PrintMode::TicketCopy | PrintMode::TicketEnd => self.settle(intent, &printer).await,
        }
    }

    /// Cache lookup with one forced refresh on a miss; a second miss is a
    /// user-visible denial.
    async fn resolve_printer(&self, name: &str) -> Result<CachedPrinter> {
        self.registry.ensure_initialized().await?;
        match self.registry.lookup(name) {
            Some(printer) => Ok(printer),
            None => {
                info!(printer = name, "not cached, forcing registry refresh");
                self.registry.refresh(true).await?;
                self.registry.lookup(name).ok_or_else(|| {
                    GatewayError::AccessDenied(format!("printer '{name}' is not available"))
                })
            }
        }
    }

    // -- direct send ---------------------------------------------------------

    async fn direct_send(
        &self,
        intent: PrintIntent,
        printer: &CachedPrinter,
    ) -> Result<DispatchReport> {
        let (chunks, total) = self.costed_chunks(&intent, printer).await?;
        self.check_affordable(&intent.account, &total).await?;

        let mut jobs: Vec<DispatchedJob> = Vec::with_capacity(chunks.len());
        let mut log = self.log_entry(&intent, printer, &chunks, total);

        if intent.job_sheets && self.config.job_sheets_enabled {
            self.send_banner(&intent, printer, BannerPosition::Start)
                .await?;
        }

        // Chunks partition the rendered document in view order.
        let mut window_offset = 0u32;
        for (index, chunk) in chunks.iter().enumerate() {
            let result = self
                .send_chunk(&intent, printer, chunk, window_offset)
                .await;
            window_offset += chunk.pages;

            match result {
                Ok((job, pdf)) => {
                    log.pdf_digests.push(hex::encode(Sha256::digest(&pdf)));
                    self.retain(printer, &log, &pdf).await;
                    jobs.push(job);
                }
                Err(err) => {
                    return Err(chunk_failure(err, index, chunks.len(), &jobs));
                }
            }
        }

        if intent.job_sheets && self.config.job_sheets_enabled {
            self.send_banner(&intent, printer, BannerPosition::End)
                .await?;
        }

        log.device_jobs = jobs.iter().map(|j| j.job_id).collect();
        self.apply_clear_scope(&intent.user, &chunks)?;
        self.collaborators.notifier.notify(&log).await?;

        info!(jobs = jobs.len(), cents = log.cost.cents, "dispatch complete");
        Ok(DispatchReport { log, jobs })
    }

    /// Prepare and send one chunk.  Returns the device job and the bytes
    /// that actually went to the wire (for retention).
    async fn send_chunk(
        &self,
        intent: &PrintIntent,
        printer: &CachedPrinter,
        chunk: &JobChunk,
        window_offset: u32,
    ) -> Result<(DispatchedJob, Vec<u8>)> {
        let mut pdf = self.chunk_pdf(intent, chunk, window_offset).await?;

        if intent.grayscale && !printer.grayscale_native {
            pdf = pdf_prep::to_grayscale(&pdf)?;
        }

        // Client-side collation pre-expands the copies; the protocol call
        // for the expanded PDF presents copy-count 1.
        let (pdf, wire_copies) = if intent.copies > 1 && intent.collate && !printer.collate_native {
            (pdf_prep::expand_copies(&pdf, intent.copies, true)?, 1)
        } else {
            (pdf, intent.copies)
        };

        let mut options = intent.options.clone();
        options.insert("media".into(), chunk.assignment.media.as_str().to_string());
        options.insert(
            "media-source".into(),
            chunk.assignment.source.ipp_keyword().to_string(),
        );
        options.insert(
            "print-scaling".into(),
            chunk.assignment.scaling.ipp_keyword().to_string(),
        );
        if intent.grayscale && printer.grayscale_native {
            options.insert("print-color-mode".into(), "monochrome".into());
        }

        let request = SendJobRequest {
            printer_uri: printer.protocol_uri.clone(),
            document: pdf.clone(),
            job_name: chunk.job_name.clone(),
            user: intent.user.clone(),
            copies: wire_copies,
            collate: intent.collate,
            options,
        };

        let job = self.protocol.send_job(request).await?;
        Ok((job, pdf))
    }

    /// Acquire the PDF bytes for one chunk.
    async fn chunk_pdf(
        &self,
        intent: &PrintIntent,
        chunk: &JobChunk,
        window_offset: u32,
    ) -> Result<Vec<u8>> {
        match &intent.source {
            PdfSource::Rendered(bytes) => {
                let total = pdf_prep::page_count(bytes)?;
                if window_offset == 0 && chunk.pages >= total {
                    return Ok(bytes.clone());
                }
                let pages: Vec<u32> =
                    (window_offset + 1..=window_offset + chunk.pages).collect();
                pdf_prep::extract_pages(bytes, &pages)
            }
            PdfSource::Render { files, landscape } => {
                let spec = RenderSpec {
                    user: intent.user.clone(),
                    files: files.clone(),
                    ranges: chunk.ranges.clone(),
                    landscape: *landscape,
                };
                self.collaborators.generator.generate(&spec).await
            }
        }
    }

    /// Banner sheets are one-sided monochrome single-copy sends, rendered
    /// in memory and gone after the send.
    async fn send_banner(
        &self,
        intent: &PrintIntent,
        printer: &CachedPrinter,
        position: BannerPosition,
    ) -> Result<()> {
        let spec = JobSheetSpec {
            position,
            title: intent.job_name.clone(),
            user: intent.user.clone(),
            printer: printer.display_name.clone(),
            when: Utc::now(),
            locale: intent.locale.clone(),
        };
        let bytes = self.collaborators.generator.banner(&spec).await?;

        let mut options = BTreeMap::new();
        options.insert("sides".to_string(), "one-sided".to_string());
        options.insert("print-color-mode".to_string(), "monochrome".to_string());

        let request = SendJobRequest {
            printer_uri: printer.protocol_uri.clone(),
            document: bytes,
            job_name: format!("{} (banner)", intent.job_name),
            user: intent.user.clone(),
            copies: 1,
            collate: false,
            options,
        };
        self.protocol.send_job(request).await.map(|_| ())
    }

    // -- hold / ticket placement ---------------------------------------------

    /// Park the request for later release by the outbox scheduler.  The
    /// affordability check runs now so an unaffordable request is refused
    /// at submission, not at release.
    async fn enqueue(
        &self,
        intent: PrintIntent,
        printer: &CachedPrinter,
    ) -> Result<DispatchReport> {
        let (chunks, total) = self.costed_chunks(&intent, printer).await?;
        self.check_affordable(&intent.account, &total).await?;

        let pdf = match &intent.source {
            PdfSource::Rendered(bytes) => bytes.clone(),
            PdfSource::Render { files, landscape } => {
                let all_ranges: Vec<(usize, RangeAtom)> = chunks
                    .iter()
                    .flat_map(|c| c.ranges.iter().cloned())
                    .collect();
                let spec = RenderSpec {
                    user: intent.user.clone(),
                    files: files.clone(),
                    ranges: all_ranges,
                    landscape: *landscape,
                };
                self.collaborators.generator.generate(&spec).await?
            }
        };

        // ticket source PDFs survive until ticket completion
        let path = ScopedPdf::write(&pdf)?.preserve()?;
        let log = self.log_entry(&intent, printer, &chunks, total);
        if let Err(err) = self.collaborators.hold_store.enqueue(&log, &path).await {
            // nothing will ever release a request the store never accepted
            let _ = std::fs::remove_file(&path);
            return Err(err);
        }

        info!(mode = ?intent.mode, path = %path.display(), "request parked for release");
        Ok(DispatchReport {
            log,
            jobs: Vec::new(),
        })
    }

    // -- settlement ----------------------------------------------------------

    /// Record a print event without a physical send.  A settlement failure
    /// is surfaced, but the already-logged event stands.
    async fn settle(
        &self,
        intent: PrintIntent,
        printer: &CachedPrinter,
    ) -> Result<DispatchReport> {
        let (chunks, total) = self.costed_chunks(&intent, printer).await?;
        let log = self.log_entry(&intent, printer, &chunks, total);

        self.apply_clear_scope(&intent.user, &chunks)?;
        self.collaborators.notifier.notify(&log).await?;

        if printer.externally_managed {
            if let Err(err) = self.collaborators.settlement.settle(&log).await {
                warn!("settlement failed after print event was logged: {err}");
                return Err(err);
            }
        }

        Ok(DispatchReport {
            log,
            jobs: Vec::new(),
        })
    }

    // -- shared steps --------------------------------------------------------

    /// Cost every chunk that does not carry a cost yet and fold the
    /// account-wide total.  An empty chunk set on a rendered source becomes
    /// the single implicit whole-document chunk.
    async fn costed_chunks(
        &self,
        intent: &PrintIntent,
        printer: &CachedPrinter,
    ) -> Result<(Vec<JobChunk>, CostResult)> {
        let mut chunks = if intent.chunks.is_empty() {
            vec![self.implicit_chunk(intent)?]
        } else {
            intent.chunks.clone()
        };

        let mut total = CostResult::ZERO;
        for chunk in &mut chunks {
            let cost = match chunk.cost {
                Some(cost) => cost,
                None => {
                    let params = CostParams {
                        pages: chunk.pages,
                        sheets: chunk.sheets,
                        copies: intent.copies,
                        color: !intent.grayscale && printer.color,
                        media: chunk.assignment.media.as_str().to_string(),
                    };
                    let cost = self
                        .collaborators
                        .cost
                        .calc(&intent.user, printer, &params)
                        .await?;
                    chunk.cost = Some(cost);
                    cost
                }
            };
            total = total.accumulate(cost);
        }
        Ok((chunks, total))
    }

    fn implicit_chunk(&self, intent: &PrintIntent) -> Result<JobChunk> {
        let PdfSource::Rendered(bytes) = &intent.source else {
            return Err(GatewayError::Pdf(
                "a render source needs explicit chunks".into(),
            ));
        };
        let pages = pdf_prep::page_count(bytes)?;
        Ok(JobChunk {
            ranges: Vec::new(),
            assignment: printgate_inbox::MediaAssignment::new("iso_a4_210x297mm"),
            job_name: intent.job_name.clone(),
            pages,
            filler_pages: 0,
            sheets: pages,
            cost: None,
            clear_scope: ClearScope::None,
        })
    }

    /// The account-wide total must be affordable before anything is sent.
    /// Per-chunk checks would pass requests whose sum overruns the account.
    async fn check_affordable(&self, account: &AccountId, total: &CostResult) -> Result<()> {
        if self
            .collaborators
            .balance
            .is_sufficient(account, total)
            .await?
        {
            Ok(())
        } else {
            Err(GatewayError::AccessDenied(format!(
                "account '{account}' cannot afford {} cents for {} pages",
                total.cents, total.pages
            )))
        }
    }

    fn log_entry(
        &self,
        intent: &PrintIntent,
        printer: &CachedPrinter,
        chunks: &[JobChunk],
        total: CostResult,
    ) -> PrintLogEntry {
        PrintLogEntry {
            request_id: intent.request_id,
            user: intent.user.clone(),
            account: intent.account.clone(),
            printer: printer.name.clone(),
            job_name: intent.job_name.clone(),
            mode: intent.mode,
            pages: chunks.iter().map(|c| c.pages).sum(),
            sheets: chunks.iter().map(|c| c.sheets).sum(),
            copies: intent.copies,
            cost: total,
            device_jobs: Vec::new(),
            pdf_digests: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Archive/journal the dispatched bytes per retention policy.  Retention
    /// failures are logged, never fatal: the job is already on the device.
    async fn retain(&self, printer: &CachedPrinter, log: &PrintLogEntry, pdf: &[u8]) {
        if self.config.archive_enabled && !printer.archive_disabled {
            if let Err(err) = self
                .collaborators
                .document_store
                .store(StoredKind::Archive, log, pdf)
                .await
            {
                warn!("archive store failed: {err}");
            }
        }
        if self.config.journal_enabled && !printer.journal_disabled {
            if let Err(err) = self
                .collaborators
                .document_store
                .store(StoredKind::Journal, log, pdf)
                .await
            {
                warn!("journal store failed: {err}");
            }
        }
    }

    /// Remove the consumed pages/jobs from the user's queue.  Callers hold
    /// the per-user queue lock.
    fn apply_clear_scope(&self, user: &UserId, chunks: &[JobChunk]) -> Result<()> {
        if chunks.iter().all(|c| c.clear_scope == ClearScope::None) {
            return Ok(());
        }
        if chunks.iter().any(|c| c.clear_scope == ClearScope::All) {
            return self.inbox.clear(user);
        }

        let mut doc = self.inbox.load(user)?;
        for chunk in chunks {
            match chunk.clear_scope {
                ClearScope::None | ClearScope::All => {}
                ClearScope::Pages => {
                    ranges::remove_job_local_ranges(&mut doc, &chunk.ranges);
                }
                ClearScope::Jobs => {
                    let consumed: BTreeSet<usize> =
                        chunk.ranges.iter().map(|(job, _)| *job).collect();
                    doc.pages.retain(|entry| !consumed.contains(&entry.job));
                }
            }
        }
        self.inbox.prune_orphans(user, &mut doc);
        self.inbox.save(user, &doc)
    }
}

/// Wrap a chunk error with the asymmetry the caller must know about: the
/// chunks already on the device stay there.
fn chunk_failure(
    err: GatewayError,
    index: usize,
    total: usize,
    sent: &[DispatchedJob],
) -> GatewayError {
    let sent_ids: Vec<String> = sent.iter().map(|j| j.job_id.to_string()).collect();
    let detail = format!(
        "chunk {}/{} failed; {} chunk(s) already on the device (job ids [{}]) cannot be retracted: {err}",
        index + 1,
        total,
        sent.len(),
        sent_ids.join(", ")
    );
    match err {
        GatewayError::Connect(_) => GatewayError::Connect(detail),
        GatewayError::ProtocolSyntax(_) => GatewayError::ProtocolSyntax(detail),
        other => other,
    }
}
