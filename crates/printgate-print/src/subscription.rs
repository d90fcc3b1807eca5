// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Event-push subscription maintenance.
//
// The gateway keeps one server subscription alive so out-of-band device and
// job state changes reach the registry without polling.  The lease is
// renewed before expiry; a lease the server has forgotten is recreated.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use printgate_core::error::Result;

use crate::ipp_client::JobProtocol;

/// Events the gateway subscribes to (RFC 3995 keywords).
pub const SUBSCRIBED_EVENTS: &[&str] = &[
    "printer-state-changed",
    "printer-config-changed",
    "printer-media-changed",
    "job-created",
    "job-state-changed",
    "job-completed",
    "job-stopped",
    "server-restarted",
    "server-started",
    "server-stopped",
];

/// Renew once this fraction of the lease remains.
const RENEWAL_MARGIN_DIVISOR: u32 = 3;

#[derive(Debug, Clone, Copy)]
struct ActiveLease {
    id: i32,
    granted_secs: u32,
    acquired_at: Instant,
}

impl ActiveLease {
    fn renewal_due(&self) -> bool {
        let margin = Duration::from_secs(u64::from(self.granted_secs / RENEWAL_MARGIN_DIVISOR));
        let lease = Duration::from_secs(u64::from(self.granted_secs));
        self.acquired_at.elapsed() + margin >= lease
    }
}

/// Keeps the gateway's server subscription alive.
pub struct SubscriptionKeeper {
    protocol: Arc<dyn JobProtocol>,
    lease_secs: u32,
    lease: Mutex<Option<ActiveLease>>,
}

impl SubscriptionKeeper {
    pub fn new(protocol: Arc<dyn JobProtocol>, lease_secs: u32) -> Self {
        Self {
            protocol,
            lease_secs,
            lease: Mutex::new(None),
        }
    }

    /// Create the subscription if none is active.  Returns the active
    /// subscription id.
    #[instrument(skip(self))]
    pub async fn ensure_active(&self) -> Result<i32> {
        let mut lease = self.lease.lock().await;
        if let Some(active) = *lease {
            return Ok(active.id);
        }
        let events: Vec<String> = SUBSCRIBED_EVENTS.iter().map(|e| e.to_string()).collect();
        let granted = self
            .protocol
            .create_subscription(&events, self.lease_secs)
            .await?;
        info!(id = granted.id, lease_secs = granted.lease_secs, "subscription established");
        *lease = Some(ActiveLease {
            id: granted.id,
            granted_secs: granted.lease_secs,
            acquired_at: Instant::now(),
        });
        Ok(granted.id)
    }

    /// One maintenance step: create the subscription when absent, renew it
    /// when the margin is reached, recreate it when the server no longer
    /// knows the lease.  Called periodically by the maintenance task.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<()> {
        let due = {
            let lease = self.lease.lock().await;
            match *lease {
                None => None,
                Some(active) if active.renewal_due() => Some(active.id),
                Some(_) => return Ok(()),
            }
        };

        let Some(id) = due else {
            self.ensure_active().await?;
            return Ok(());
        };

        match self.protocol.renew_subscription(id, self.lease_secs).await {
            Ok(granted_secs) => {
                debug!(id, granted_secs, "subscription renewed");
                let mut lease = self.lease.lock().await;
                *lease = Some(ActiveLease {
                    id,
                    granted_secs,
                    acquired_at: Instant::now(),
                });
                Ok(())
            }
            Err(err) => {
                // server lost the lease (restart, purge); start over
                warn!(id, "renewal failed, recreating subscription: {err}");
                {
                    let mut lease = self.lease.lock().await;
                    *lease = None;
                }
                self.ensure_active().await.map(|_| ())
            }
        }
    }

    /// Cancel the active subscription, if any.  Part of process shutdown.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<()> {
        let id = {
            let mut lease = self.lease.lock().await;
            lease.take().map(|active| active.id)
        };
        if let Some(id) = id {
            self.protocol.cancel_subscription(id).await?;
            info!(id, "subscription cancelled on shutdown");
        }
        Ok(())
    }

    /// Spawn the periodic maintenance loop.  Errors are logged and retried
    /// on the next interval; the loop never exits on its own.
    pub fn spawn_maintenance(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = self.tick().await {
                    warn!("subscription maintenance failed: {err}");
                }
            }
        })
    }
}
