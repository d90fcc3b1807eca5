// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page-range algebra — pure functions over page-range expressions and
// interval lists.
//
// Grammar: a comma-separated list of tokens, each either an integer N
// (meaning the single page N) or "A-B" where an empty A defaults to 1 and
// an empty B leaves the range open to the end of its container.  Empty
// input text means "all pages" ("1-").  Invalid text is an `Option::None`
// sentinel, never an error value — callers choose the user-facing message.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::document::{PageRangeEntry, QueueDocument};

/// An inclusive page interval.  `begin == None` means page 1; `end == None`
/// means "to the end of the containing document/job".
///
/// Invariant: when both bounds are present, `begin <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeAtom {
    pub begin: Option<u32>,
    pub end: Option<u32>,
}

impl RangeAtom {
    pub fn new(begin: u32, end: u32) -> Self {
        debug_assert!(begin <= end);
        Self {
            begin: Some(begin),
            end: Some(end),
        }
    }

    /// The whole container ("1-").
    pub fn full() -> Self {
        Self {
            begin: Some(1),
            end: None,
        }
    }

    /// Begin with the open bound resolved.
    pub fn effective_begin(&self) -> u32 {
        self.begin.unwrap_or(1)
    }

    /// End with the open bound resolved against the container's page count.
    pub fn effective_end(&self, container_pages: u32) -> u32 {
        self.end.unwrap_or(container_pages).min(container_pages)
    }

    /// Canonical text rendering; re-parses to the identical atom.
    pub fn to_text(&self) -> String {
        match (self.begin, self.end) {
            (Some(b), Some(e)) if b == e => b.to_string(),
            (b, e) => format!(
                "{}-{}",
                b.map(|v| v.to_string()).unwrap_or_default(),
                e.map(|v| v.to_string()).unwrap_or_default()
            ),
        }
    }
}

/// Parse range text into atoms sorted ascending by effective begin.
///
/// Returns `None` for invalid text: a non-numeric bound, a zero page
/// number, or B < A.  Atoms are sorted but not required to be merged or
/// non-overlapping.
pub fn parse(text: &str) -> Option<Vec<RangeAtom>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Some(vec![RangeAtom::full()]);
    }

    let mut atoms = Vec::new();
    for token in trimmed.split(',') {
        atoms.push(parse_token(token.trim())?);
    }
    sort_atoms(&mut atoms);
    Some(atoms)
}

fn parse_token(token: &str) -> Option<RangeAtom> {
    if token.is_empty() {
        return None;
    }
    match token.split_once('-') {
        None => {
            let page = parse_bound(token)?;
            Some(RangeAtom::new(page, page))
        }
        Some((a, b)) => {
            let begin = if a.trim().is_empty() {
                None
            } else {
                Some(parse_bound(a.trim())?)
            };
            let end = if b.trim().is_empty() {
                None
            } else {
                Some(parse_bound(b.trim())?)
            };
            if let (Some(bv), Some(ev)) = (begin, end)
                && ev < bv
            {
                return None;
            }
            Some(RangeAtom { begin, end })
        }
    }
}

/// Page numbers are 1-based; zero is invalid.
fn parse_bound(text: &str) -> Option<u32> {
    match text.parse::<u32>() {
        Ok(0) | Err(_) => None,
        Ok(n) => Some(n),
    }
}

/// Sort ascending by effective begin (stable; atoms need not be merged).
pub fn sort_atoms(atoms: &mut [RangeAtom]) {
    atoms.sort_by_key(RangeAtom::effective_begin);
}

/// Canonical rendering of an atom list.
pub fn to_text(atoms: &[RangeAtom]) -> String {
    atoms
        .iter()
        .map(RangeAtom::to_text)
        .collect::<Vec<_>>()
        .join(",")
}

/// Sum of pages covered by the atoms, resolving open bounds against the
/// container's total page count.  Atoms beyond the container contribute
/// nothing.
pub fn count_pages(atoms: &[RangeAtom], container_pages: u32) -> u32 {
    atoms
        .iter()
        .map(|a| {
            let begin = a.effective_begin();
            let end = a.effective_end(container_pages);
            if begin > end { 0 } else { end - begin + 1 }
        })
        .sum()
}

/// True iff the document is "vanilla": every source job has exactly one
/// full-span view entry, in job order.
pub fn is_vanilla(doc: &QueueDocument) -> bool {
    if doc.pages.len() != doc.jobs.len() {
        return false;
    }
    doc.pages.iter().enumerate().all(|(i, entry)| {
        if entry.job != i {
            return false;
        }
        let Some(atoms) = parse(&entry.range) else {
            return false;
        };
        let [atom] = atoms.as_slice() else {
            return false;
        };
        atom.begin.is_none_or(|b| b <= 1)
            && atom.end.is_none_or(|e| e == doc.jobs[i].pages)
    })
}

// ---------------------------------------------------------------------------
// Coordinate transforms (vanilla documents only)
// ---------------------------------------------------------------------------

/// Translate a job-local range into absolute merged-document numbering.
///
/// Only a vanilla document has a single well-defined absolute numbering;
/// returns `None` otherwise, and for an out-of-range job index.  Open
/// bounds are resolved against the job's page count.
pub fn to_document_range(
    doc: &QueueDocument,
    job: usize,
    atom: RangeAtom,
) -> Option<RangeAtom> {
    if !is_vanilla(doc) || job >= doc.jobs.len() {
        return None;
    }
    let offset: u32 = doc.jobs[..job].iter().map(|j| j.pages).sum();
    let begin = atom.effective_begin();
    let end = atom.effective_end(doc.jobs[job].pages);
    if begin > end {
        return None;
    }
    Some(RangeAtom::new(offset + begin, offset + end))
}

/// Translate an absolute merged-document range back into job-local
/// numbering.  The range must fall entirely within one job; vanilla
/// precondition as for [`to_document_range`].
pub fn to_job_local_range(doc: &QueueDocument, atom: RangeAtom) -> Option<(usize, RangeAtom)> {
    if !is_vanilla(doc) {
        return None;
    }
    let total: u32 = doc.jobs.iter().map(|j| j.pages).sum();
    let begin = atom.effective_begin();
    let end = atom.effective_end(total);
    if begin > end || end > total {
        return None;
    }

    let mut offset = 0u32;
    for (index, job) in doc.jobs.iter().enumerate() {
        let job_end = offset + job.pages;
        if begin > offset && begin <= job_end {
            if end > job_end {
                return None; // spans a job boundary
            }
            return Some((index, RangeAtom::new(begin - offset, end - offset)));
        }
        offset = job_end;
    }
    None
}

// ---------------------------------------------------------------------------
// Interval overlap classification
// ---------------------------------------------------------------------------

/// Relationship of a filter interval `[ff, ft]` to a document interval
/// `[df, dt]` (both inclusive, in the same coordinate space).  Exactly one
/// case applies to any pair of non-empty intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapRelation {
    /// Filter ends before the document interval begins.
    DisjointBefore,
    /// Filter ends exactly on the document interval's first page.
    TouchLeft,
    /// Filter sticks out to the left, ending inside the document interval.
    PartialLeft,
    /// One interval lies within the other (either direction), not exactly.
    Contained,
    /// Identical intervals.
    Exact,
    /// Filter begins inside the document interval and sticks out right.
    PartialRight,
    /// Filter begins exactly on the document interval's last page.
    TouchRight,
    /// Filter begins after the document interval ends.
    DisjointAfter,
}

/// Classify `[ff, ft]` against `[df, dt]`.  Both intervals must satisfy
/// begin <= end.
pub fn classify(ff: u32, ft: u32, df: u32, dt: u32) -> OverlapRelation {
    debug_assert!(ff <= ft && df <= dt);
    if ft < df {
        OverlapRelation::DisjointBefore
    } else if ff > dt {
        OverlapRelation::DisjointAfter
    } else if ff == df && ft == dt {
        OverlapRelation::Exact
    } else if ft == df {
        OverlapRelation::TouchLeft
    } else if ff == dt {
        OverlapRelation::TouchRight
    } else if (ff >= df && ft <= dt) || (ff <= df && ft >= dt) {
        OverlapRelation::Contained
    } else if ff < df {
        OverlapRelation::PartialLeft
    } else {
        OverlapRelation::PartialRight
    }
}

impl OverlapRelation {
    pub fn overlaps(self) -> bool {
        !matches!(self, Self::DisjointBefore | Self::DisjointAfter)
    }
}

// ---------------------------------------------------------------------------
// Document filtering
// ---------------------------------------------------------------------------

/// One flattened interval of the document's logical view, tracked in
/// absolute and job-local coordinates simultaneously.
#[derive(Debug, Clone, Copy)]
struct ViewSegment {
    job: usize,
    local_begin: u32,
    abs_begin: u32,
    abs_end: u32,
}

/// Filter the document's logical view by a range expression in absolute
/// merged-document page coordinates.
///
/// A blank filter returns the borrowed document unchanged (callers use
/// `Cow::Borrowed` to detect the no-op).  Invalid filter text returns
/// `None`.  Otherwise the result is a new document whose view entries are
/// the overlap of the filter with the existing per-job entries, attributed
/// to their original jobs and coalesced where adjacent.
pub fn filter_by_document_range<'a>(
    doc: &'a QueueDocument,
    filter_text: &str,
) -> Option<Cow<'a, QueueDocument>> {
    if filter_text.trim().is_empty() {
        return Some(Cow::Borrowed(doc));
    }
    let filter_atoms = parse(filter_text)?;

    // Flatten the view into absolute segments.
    let mut segments: Vec<ViewSegment> = Vec::new();
    let mut cursor = 0u32;
    for entry in &doc.pages {
        let job_pages = doc.jobs.get(entry.job).map(|j| j.pages).unwrap_or(0);
        let atoms = parse(&entry.range)?;
        for atom in atoms {
            let begin = atom.effective_begin();
            let end = atom.effective_end(job_pages);
            if begin > end {
                continue;
            }
            let span = end - begin + 1;
            segments.push(ViewSegment {
                job: entry.job,
                local_begin: begin,
                abs_begin: cursor + 1,
                abs_end: cursor + span,
            });
            cursor += span;
        }
    }
    let total_pages = cursor;

    // Resolve the filter against the merged-document span, dropping atoms
    // entirely past the end.
    let mut filters: Vec<(u32, u32)> = Vec::new();
    for atom in filter_atoms {
        let begin = atom.effective_begin();
        let end = atom.effective_end(total_pages);
        if begin <= end {
            filters.push((begin, end));
        }
    }

    // Two independently advancing sorted cursors.
    let mut emitted: Vec<(usize, u32, u32)> = Vec::new();
    let mut f_idx = 0usize;
    let mut d_idx = 0usize;
    let mut cur_filter = filters.first().copied();
    let mut cur_seg = segments.first().copied();

    while let (Some((ff, ft)), Some(seg)) = (cur_filter, cur_seg) {
        let (df, dt) = (seg.abs_begin, seg.abs_end);
        let relation = classify(ff, ft, df, dt);

        if relation.overlaps() {
            let ob = ff.max(df);
            let oe = ft.min(dt);
            let local = seg.local_begin + (ob - seg.abs_begin);
            emitted.push((seg.job, local, local + (oe - ob)));

            // Advance only the exhausted side; both on an exact match.
            let filter_done = ft <= oe;
            let seg_done = dt <= oe;
            if filter_done {
                f_idx += 1;
                cur_filter = filters.get(f_idx).copied();
            } else {
                cur_filter = Some((oe + 1, ft));
            }
            if seg_done {
                d_idx += 1;
                cur_seg = segments.get(d_idx).copied();
            } else {
                cur_seg = Some(ViewSegment {
                    job: seg.job,
                    local_begin: seg.local_begin + (oe + 1 - seg.abs_begin),
                    abs_begin: oe + 1,
                    abs_end: seg.abs_end,
                });
            }
        } else if relation == OverlapRelation::DisjointBefore {
            f_idx += 1;
            cur_filter = filters.get(f_idx).copied();
        } else {
            d_idx += 1;
            cur_seg = segments.get(d_idx).copied();
        }
    }

    let entries = optimize(emitted);
    Some(Cow::Owned(QueueDocument {
        jobs: doc.jobs.clone(),
        pages: entries,
        letterhead: doc.letterhead.clone(),
        last_preview_epoch_millis: doc.last_preview_epoch_millis,
    }))
}

/// Delete the pages a merged-document filter selects, keeping the inverse
/// view.  A blank filter selects everything and empties the view.  Returns
/// `None` when the filter text is invalid; the document is untouched then.
pub fn delete_document_range(doc: &mut QueueDocument, filter_text: &str) -> Option<()> {
    if filter_text.trim().is_empty() {
        doc.pages.clear();
        return Some(());
    }

    let removals: Vec<(usize, RangeAtom)> = {
        let selected = filter_by_document_range(doc, filter_text)?;
        let mut pairs = Vec::new();
        for entry in &selected.pages {
            let job_pages = doc.jobs.get(entry.job).map(|j| j.pages).unwrap_or(0);
            for atom in parse(&entry.range)? {
                let begin = atom.effective_begin();
                let end = atom.effective_end(job_pages);
                if begin <= end {
                    pairs.push((entry.job, RangeAtom::new(begin, end)));
                }
            }
        }
        pairs
    };

    remove_job_local_ranges(doc, &removals);
    Some(())
}

/// Remove job-local page intervals from the document's view, splitting
/// entries where the removal lands in the middle.  Used when a dispatched
/// request clears only the pages it consumed.  Entries left without pages
/// are dropped; jobs left without any entry become orphaned and are pruned
/// by the caller.
pub fn remove_job_local_ranges(doc: &mut QueueDocument, removals: &[(usize, RangeAtom)]) {
    let mut next: Vec<PageRangeEntry> = Vec::with_capacity(doc.pages.len());

    for entry in &doc.pages {
        let job_pages = doc.jobs.get(entry.job).map(|j| j.pages).unwrap_or(0);
        let Some(atoms) = parse(&entry.range) else {
            // unparseable entries are left untouched
            next.push(entry.clone());
            continue;
        };

        // Entries the removals never overlap keep their original text, so
        // an open-ended range stays open-ended.
        let mut touched = false;
        let mut kept: Vec<RangeAtom> = Vec::new();
        for atom in atoms {
            let begin = atom.effective_begin();
            let end = atom.effective_end(job_pages);
            if begin > end {
                continue;
            }
            let mut pieces = vec![(begin, end)];
            for (_, removal) in removals.iter().filter(|(j, _)| *j == entry.job) {
                let rb = removal.effective_begin();
                let re = removal.effective_end(job_pages);
                let mut survived = Vec::with_capacity(pieces.len() + 1);
                for (pb, pe) in pieces {
                    if re < pb || rb > pe {
                        survived.push((pb, pe));
                        continue;
                    }
                    touched = true;
                    if pb < rb {
                        survived.push((pb, rb - 1));
                    }
                    if re < pe {
                        survived.push((re + 1, pe));
                    }
                }
                pieces = survived;
            }
            kept.extend(pieces.into_iter().map(|(b, e)| RangeAtom::new(b, e)));
        }

        if !touched {
            next.push(entry.clone());
        } else if !kept.is_empty() {
            next.push(PageRangeEntry {
                job: entry.job,
                range: to_text(&kept),
            });
        }
    }

    doc.pages = next;
}

/// Coalesce adjacent same-job intervals into single entries.
fn optimize(emitted: Vec<(usize, u32, u32)>) -> Vec<PageRangeEntry> {
    let mut merged: Vec<(usize, u32, u32)> = Vec::with_capacity(emitted.len());
    for (job, begin, end) in emitted {
        match merged.last_mut() {
            Some((last_job, _, last_end)) if *last_job == job && *last_end + 1 == begin => {
                *last_end = end;
            }
            _ => merged.push((job, begin, end)),
        }
    }
    merged
        .into_iter()
        .map(|(job, begin, end)| PageRangeEntry {
            job,
            range: RangeAtom::new(begin, end).to_text(),
        })
        .collect()
}
