// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printgate Inbox — the user's editable multi-document print queue: the
// page-range algebra that models and filters it, the JSON-backed descriptor
// store, and the chunker that turns a queue view into homogeneous physical
// job units.

pub mod chunker;
pub mod document;
pub mod ranges;
pub mod store;

pub use chunker::{JobChunk, MediaAssignment};
pub use document::{PageRangeEntry, QueueDocument, SourceJob};
pub use ranges::RangeAtom;
pub use store::InboxStore;
