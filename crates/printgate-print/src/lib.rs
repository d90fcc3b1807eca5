// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printgate Print — IPP job client against the CUPS print server, the
// failure-tolerant printer registry, and the dispatcher that drives one
// print intent through cost check, PDF acquisition, protocol dispatch, and
// post-conditions.

pub mod circuit;
pub mod collaborators;
pub mod dispatcher;
pub mod ipp_client;
pub mod options;
pub mod pdf_prep;
pub mod registry;
pub mod subscription;

pub use circuit::CircuitBreaker;
pub use collaborators::Collaborators;
pub use dispatcher::{DispatchReport, PdfSource, PrintDispatcher, PrintIntent};
pub use ipp_client::{IppJobClient, JobProtocol};
pub use registry::{CachedPrinter, PrinterRegistry, RefreshOutcome};
pub use subscription::SubscriptionKeeper;
