// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Printgate.

use thiserror::Error;

/// Top-level error type for all Printgate operations.
///
/// The variant set is deliberately closed: callers branch on [`ErrorKind`]
/// rather than on concrete error types, so transport failures and logic
/// failures stay distinguishable across crate boundaries.
#[derive(Debug, Error)]
pub enum GatewayError {
    // -- Transport / protocol --
    #[error("print server connection failed: {0}")]
    Connect(String),

    #[error("malformed IPP response: {0}")]
    ProtocolSyntax(String),

    // -- Access / lookup --
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    // -- Stored data --
    /// A malformed stored attribute (legacy cost record, stale descriptor
    /// field). The offending record has already been dropped and the
    /// operation continued with a default; this value is informational.
    #[error("self-healed stored data: {0}")]
    SelfHealingData(String),

    #[error("queue store error: {0}")]
    Store(String),

    // -- Documents --
    #[error("PDF operation failed: {0}")]
    Pdf(String),

    // -- Plumbing --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Closed classification of gateway errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transport failure — retryable, drives the circuit breaker.
    Connect,
    /// Malformed response — fatal for that call.
    ProtocolSyntax,
    /// Disabled printer, missing permission, insufficient balance.
    AccessDenied,
    /// Printer absent from cache; caller may force a refresh and retry once.
    NotFound,
    /// Offending record deleted, operation proceeded with a default.
    SelfHealingData,
    /// Queue descriptor or retention store failure.
    Store,
    /// PDF acquisition or preparation failure.
    Pdf,
    /// Local I/O or serialization failure.
    Internal,
}

impl GatewayError {
    /// Map this error to its closed kind value.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connect(_) => ErrorKind::Connect,
            Self::ProtocolSyntax(_) => ErrorKind::ProtocolSyntax,
            Self::AccessDenied(_) => ErrorKind::AccessDenied,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::SelfHealingData(_) => ErrorKind::SelfHealingData,
            Self::Store(_) => ErrorKind::Store,
            Self::Pdf(_) => ErrorKind::Pdf,
            Self::Io(_) | Self::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Whether a fresh attempt against the same endpoint can succeed.
    ///
    /// Only transport failures qualify; logic errors (access, syntax, data)
    /// will fail identically on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Connect)
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, GatewayError>;
