// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Gateway configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Persistent gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Host of the CUPS print server the gateway proxies for.
    pub server_host: String,
    /// IPP port on the print server (default 631).
    pub server_port: u16,
    /// TCP connect timeout for protocol calls, in seconds.
    pub connect_timeout_secs: u64,
    /// Read timeout for protocol round trips, in seconds.
    pub read_timeout_secs: u64,
    /// Requested lease for IPP event subscriptions, in seconds.
    pub notification_lease_secs: u32,
    /// Directory holding per-user queue descriptors and job files.
    pub user_queue_dir: PathBuf,
    /// Keep a copy of every printed PDF in the archive store.
    pub archive_enabled: bool,
    /// Journal print events for retention/billing reconstruction.
    pub journal_enabled: bool,
    /// Emit banner job sheets around ticket releases.
    pub job_sheets_enabled: bool,
    /// Consecutive connect failures before the circuit opens.
    pub circuit_failure_threshold: u32,
    /// Cooldown before an open circuit allows a probe, in seconds.
    pub circuit_cooldown_secs: u64,
}

impl GatewayConfig {
    /// Base IPP URI of the print server, e.g. `ipp://cups.local:631/`.
    pub fn server_uri(&self) -> String {
        format!("ipp://{}:{}/", self.server_host, self.server_port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn circuit_cooldown(&self) -> Duration {
        Duration::from_secs(self.circuit_cooldown_secs)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server_host: "localhost".into(),
            server_port: 631,
            connect_timeout_secs: 10,
            read_timeout_secs: 60,
            notification_lease_secs: 3600,
            user_queue_dir: PathBuf::from("inbox"),
            archive_enabled: true,
            journal_enabled: true,
            job_sheets_enabled: false,
            circuit_failure_threshold: 3,
            circuit_cooldown_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_uri_format() {
        let config = GatewayConfig {
            server_host: "cups.example.org".into(),
            server_port: 631,
            ..GatewayConfig::default()
        };
        assert_eq!(config.server_uri(), "ipp://cups.example.org:631/");
    }
}
