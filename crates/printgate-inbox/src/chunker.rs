// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Inbox chunker — turns a (possibly filtered) queue view into one or more
// homogeneous physical-job chunks.  A chunk groups consecutive pages that
// share the same media / media-source / scaling combination; each chunk is
// dispatched to the device as one physical job.

use printgate_core::types::{ClearScope, CostResult, Media, MediaSource, PageScaling};

use crate::document::QueueDocument;
use crate::ranges::{self, RangeAtom};

/// The media combination a page requires.  Pages with equal assignments can
/// share a physical job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAssignment {
    pub media: Media,
    pub source: MediaSource,
    pub scaling: PageScaling,
}

impl MediaAssignment {
    pub fn new(media: &str) -> Self {
        Self {
            media: Media(media.into()),
            source: MediaSource::Auto,
            scaling: PageScaling::Fit,
        }
    }
}

/// Sheet layout of the physical job, needed to count sheets and the filler
/// pages a duplex/n-up layout inserts.
#[derive(Debug, Clone, Copy)]
pub struct SheetLayout {
    pub duplex: bool,
    /// Logical pages per printed side (1, 2, 4, ...).
    pub pages_per_side: u32,
}

impl Default for SheetLayout {
    fn default() -> Self {
        Self {
            duplex: false,
            pages_per_side: 1,
        }
    }
}

impl SheetLayout {
    /// Logical pages consumed per physical sheet.
    fn pages_per_sheet(self) -> u32 {
        self.pages_per_side.max(1) * if self.duplex { 2 } else { 1 }
    }
}

/// A contiguous, homogeneous-media subset of the filtered queue view.
#[derive(Debug, Clone)]
pub struct JobChunk {
    /// Job-local intervals, in view order, each attributed to its source job.
    pub ranges: Vec<(usize, RangeAtom)>,
    pub assignment: MediaAssignment,
    /// Chunk-local name shown in the device queue.
    pub job_name: String,
    /// Logical pages in this chunk.
    pub pages: u32,
    /// Blank pages the layout inserts to fill the last sheet/side.
    pub filler_pages: u32,
    /// Physical sheets this chunk consumes.
    pub sheets: u32,
    /// Filled in by the dispatcher once the cost collaborator has run.
    pub cost: Option<CostResult>,
    /// Which part of the queue this chunk consumes on success.
    pub clear_scope: ClearScope,
}

/// What to chunk and how.  `assignment_for` resolves the media combination
/// a source job's pages require.
pub struct ChunkRequest<'a> {
    pub base_name: &'a str,
    pub layout: SheetLayout,
    pub clear_scope: ClearScope,
    /// When set (rapid sequential printing of several unedited documents),
    /// every source job becomes its own chunk regardless of media
    /// homogeneity, and only the last chunk carries the clear scope.
    pub per_job_individually: bool,
    /// Optional explicit filter in absolute document coordinates.
    pub explicit_filter: Option<&'a str>,
}

/// Split the queue view into physical-job chunks.
///
/// Applies [`ranges::filter_by_document_range`] first, then groups
/// consecutive view entries by media assignment (or by source job in
/// per-job mode).  Pure: re-invoking on the same inputs yields the same
/// chunks.  Returns `None` when the explicit filter text is invalid.
pub fn chunk(
    doc: &QueueDocument,
    request: &ChunkRequest<'_>,
    assignment_for: impl Fn(usize) -> MediaAssignment,
) -> Option<Vec<JobChunk>> {
    let filtered = ranges::filter_by_document_range(doc, request.explicit_filter.unwrap_or(""))?;

    // Flatten the view into (job, concrete atom) pairs.
    let mut pieces: Vec<(usize, RangeAtom)> = Vec::new();
    for entry in &filtered.pages {
        let job_pages = filtered.jobs.get(entry.job).map(|j| j.pages).unwrap_or(0);
        for atom in ranges::parse(&entry.range)? {
            let begin = atom.effective_begin();
            let end = atom.effective_end(job_pages);
            if begin <= end {
                pieces.push((entry.job, RangeAtom::new(begin, end)));
            }
        }
    }
    if pieces.is_empty() {
        return Some(Vec::new());
    }

    // Group consecutive pieces sharing a chunk key.
    let mut groups: Vec<(Vec<(usize, RangeAtom)>, MediaAssignment)> = Vec::new();
    for (job, atom) in pieces {
        let assignment = assignment_for(job);
        let same_group = groups.last().is_some_and(|(members, last_assignment)| {
            if request.per_job_individually {
                members.last().is_some_and(|(last_job, _)| *last_job == job)
            } else {
                *last_assignment == assignment
            }
        });
        match groups.last_mut() {
            Some((members, _)) if same_group => members.push((job, atom)),
            _ => groups.push((vec![(job, atom)], assignment)),
        }
    }

    let total = groups.len();
    let pages_per_sheet = request.layout.pages_per_sheet();
    let chunks = groups
        .into_iter()
        .enumerate()
        .map(|(index, (members, assignment))| {
            let pages: u32 = members
                .iter()
                .map(|(_, atom)| {
                    // Pieces carry concrete bounds by construction.
                    atom.end.unwrap_or_else(|| atom.effective_begin()) - atom.effective_begin() + 1
                })
                .sum();
            let sheets = pages.div_ceil(pages_per_sheet);
            let filler_pages = sheets * pages_per_sheet - pages;

            let job_name = if total == 1 {
                request.base_name.to_string()
            } else {
                format!("{} ({}/{})", request.base_name, index + 1, total)
            };

            // In per-job mode only the final chunk clears the queue; a
            // failure mid-sequence must not consume unprinted documents.
            let clear_scope = if index + 1 == total {
                request.clear_scope
            } else if request.per_job_individually {
                ClearScope::None
            } else {
                request.clear_scope
            };

            JobChunk {
                ranges: members,
                assignment,
                job_name,
                pages,
                filler_pages,
                sheets,
                cost: None,
                clear_scope,
            }
        })
        .collect();

    Some(chunks)
}

/// The whole (filtered) view as a single implicit chunk, used when the
/// caller has not computed chunk information.
pub fn implicit_chunk(
    doc: &QueueDocument,
    request: &ChunkRequest<'_>,
    assignment: MediaAssignment,
) -> Option<Vec<JobChunk>> {
    let single = ChunkRequest {
        base_name: request.base_name,
        layout: request.layout,
        clear_scope: request.clear_scope,
        per_job_individually: false,
        explicit_filter: request.explicit_filter,
    };
    chunk(doc, &single, |_| assignment.clone())
}
