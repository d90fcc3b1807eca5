// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The per-user queue document: an ordered list of source jobs plus the
// current logical page view after user edits.  Serialized as the JSON
// descriptor `{jobs, pages, letterhead?, lastPreviewEpochMillis?}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ranges;

/// One document delivered into the user's queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceJob {
    /// File reference relative to the user's queue directory.
    pub file: String,
    /// Human-readable document title.
    pub title: String,
    /// Total page count of the rendered document.
    pub pages: u32,
    /// Page rotation applied at render time, in degrees (0/90/180/270).
    #[serde(default)]
    pub rotate: u16,
    /// Whether the document was rendered landscape.
    #[serde(default)]
    pub landscape: bool,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    /// DRM-restricted documents are excluded from archive/journal retention.
    #[serde(default)]
    pub drm: bool,
}

/// One entry of the current logical page view: a job index plus the range
/// text selecting pages of that job.  Range text follows the grammar of
/// [`ranges::parse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRangeEntry {
    pub job: usize,
    pub range: String,
}

impl PageRangeEntry {
    /// Full-span entry for a job ("1-").
    pub fn full_span(job: usize) -> Self {
        Self {
            job,
            range: "1-".into(),
        }
    }
}

/// The user's editable multi-document queue.
///
/// `pages` is the *current* logical view after edits; `jobs` is the backing
/// list of delivered documents.  A job no longer referenced by any entry is
/// page-range-orphaned and is pruned (with its underlying file) by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueDocument {
    pub jobs: Vec<SourceJob>,
    pub pages: Vec<PageRangeEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub letterhead: Option<String>,
    #[serde(
        rename = "lastPreviewEpochMillis",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_preview_epoch_millis: Option<i64>,
}

impl Default for QueueDocument {
    fn default() -> Self {
        Self::empty()
    }
}

impl QueueDocument {
    pub fn empty() -> Self {
        Self {
            jobs: Vec::new(),
            pages: Vec::new(),
            letterhead: None,
            last_preview_epoch_millis: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Total pages of the current logical view.
    pub fn total_pages(&self) -> u32 {
        self.pages
            .iter()
            .map(|entry| {
                let job_pages = self.jobs.get(entry.job).map(|j| j.pages).unwrap_or(0);
                ranges::parse(&entry.range)
                    .map(|atoms| ranges::count_pages(&atoms, job_pages))
                    .unwrap_or(0)
            })
            .sum()
    }

    /// Append a newly arrived source job with a full-span view entry.
    pub fn add_job(&mut self, job: SourceJob) {
        let index = self.jobs.len();
        self.jobs.push(job);
        self.pages.push(PageRangeEntry::full_span(index));
    }

    /// Move the view entry at `from` to position `to`.  Out-of-range indices
    /// are a no-op.
    pub fn move_entry(&mut self, from: usize, to: usize) {
        if from < self.pages.len() && to < self.pages.len() && from != to {
            let entry = self.pages.remove(from);
            self.pages.insert(to, entry);
        }
    }

    /// Rotate a source job by 90 degrees (metadata only; the renderer applies
    /// it at print time).
    pub fn rotate_job(&mut self, job: usize) {
        if let Some(j) = self.jobs.get_mut(job) {
            j.rotate = (j.rotate + 90) % 360;
        }
    }

    /// Discard all edits: every job gets exactly one full-span entry, in job
    /// order.
    pub fn undelete(&mut self) {
        self.pages = (0..self.jobs.len()).map(PageRangeEntry::full_span).collect();
    }

    /// Replace the logical view with the entries of a filtered document.
    pub fn replace_view(&mut self, filtered: &QueueDocument) {
        self.pages = filtered.pages.clone();
    }

    /// Indices of jobs no longer referenced by any view entry.
    pub fn orphaned_jobs(&self) -> Vec<usize> {
        (0..self.jobs.len())
            .filter(|i| !self.pages.iter().any(|e| e.job == *i))
            .collect()
    }

    /// Remove the given jobs (ascending indices) and re-index the remaining
    /// view entries.  Entries referencing removed jobs are dropped.
    pub fn remove_jobs(&mut self, orphans: &[usize]) -> Vec<SourceJob> {
        let mut removed = Vec::new();
        // Walk back-to-front so indices stay valid while removing.
        for &idx in orphans.iter().rev() {
            if idx < self.jobs.len() {
                removed.push(self.jobs.remove(idx));
                self.pages.retain(|e| e.job != idx);
                for entry in &mut self.pages {
                    if entry.job > idx {
                        entry.job -= 1;
                    }
                }
            }
        }
        removed.reverse();
        removed
    }
}
