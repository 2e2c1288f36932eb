//! Background certificate renewal scheduler
//!
//! Periodically scans the renewal tracker and renews every certificate whose
//! deadline has passed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use pingora::server::ShutdownWatch;
use pingora::services::background::BackgroundService;
use tokio::time::interval;
use tracing::{debug, error, info};

use super::manager::CertificateManager;

/// Default check interval (1 minute)
const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Minimum check interval (1 second)
const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Result of one renewal pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RenewalSummary {
    pub renewed: Vec<String>,
    pub failed: Vec<String>,
    /// Domains re-issued by a request between the snapshot and their renewal
    pub skipped: Vec<String>,
}

impl RenewalSummary {
    /// Whether the pass had nothing to do
    pub fn is_empty(&self) -> bool {
        self.renewed.is_empty() && self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Background certificate renewal scheduler
///
/// Runs as a pingora background service. A failed renewal is logged and
/// retried on the next tick: tracked domains keep their expired record, and
/// queued domains stay queued.
pub struct RenewalScheduler {
    /// Manager performing the renewals
    manager: Arc<CertificateManager>,
    /// Check interval
    check_interval: Duration,
    /// Domains to renew on the next pass regardless of the tracker
    pending: Mutex<Vec<String>>,
}

impl RenewalScheduler {
    /// Create a new renewal scheduler
    pub fn new(manager: Arc<CertificateManager>) -> Self {
        Self {
            manager,
            check_interval: DEFAULT_CHECK_INTERVAL,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Set the check interval
    ///
    /// The interval is clamped to a minimum of 1 second.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval.max(MIN_CHECK_INTERVAL);
        self
    }

    /// Queue domains for renewal on the first pass
    ///
    /// Used for stored certificates whose renewal record was lost.
    pub fn with_pending(self, domains: Vec<String>) -> Self {
        self.pending.lock().extend(domains);
        self
    }

    /// Configured check interval
    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Renew every certificate due at `now`, plus any queued domains
    ///
    /// Due domains are snapshotted first and renewed concurrently without
    /// holding the tracker lock. A failure for one domain does not affect
    /// the others. Queued domains that fail and are still untracked stay
    /// queued for the next pass.
    pub async fn check_renewals(&self, now: DateTime<Utc>) -> RenewalSummary {
        let queued = std::mem::take(&mut *self.pending.lock());
        let mut domains = self.manager.tracker().snapshot_expired(now);
        domains.extend(queued.iter().cloned());
        domains.sort();
        domains.dedup();

        if domains.is_empty() {
            debug!("No certificates due for renewal");
            return RenewalSummary::default();
        }

        info!(domain_count = domains.len(), "Renewing certificates");

        let results = join_all(
            domains
                .iter()
                .map(|domain| self.manager.renew_if_due(domain, now)),
        )
        .await;

        let mut summary = RenewalSummary::default();
        for (domain, result) in domains.into_iter().zip(results) {
            match result {
                Ok(true) => {
                    info!(domain = %domain, "Certificate renewed successfully");
                    summary.renewed.push(domain);
                }
                Ok(false) => summary.skipped.push(domain),
                Err(e) => {
                    error!(
                        domain = %domain,
                        error = %e,
                        "Certificate renewal failed"
                    );
                    // Continue with other domains
                    summary.failed.push(domain);
                }
            }
        }

        // Untracked domains are only remembered here
        let retry: Vec<String> = summary
            .failed
            .iter()
            .filter(|domain| queued.contains(*domain))
            .filter(|domain| self.manager.tracker().get(domain).is_none())
            .cloned()
            .collect();
        if !retry.is_empty() {
            debug!(domains = ?retry, "Keeping failed renewals queued");
            self.pending.lock().extend(retry);
        }

        summary
    }
}

#[async_trait]
impl BackgroundService for RenewalScheduler {
    async fn start(&self, mut shutdown: ShutdownWatch) {
        info!(
            check_interval_secs = self.check_interval.as_secs(),
            "Starting certificate renewal scheduler"
        );

        let mut period = interval(self.check_interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Stopping certificate renewal scheduler");
                    break;
                }
                _ = period.tick() => {
                    debug!("Running scheduled certificate renewal check");
                    let summary = self.check_renewals(Utc::now()).await;
                    if !summary.failed.is_empty() {
                        error!(
                            failed = summary.failed.len(),
                            renewed = summary.renewed.len(),
                            "Some certificate renewals failed, retrying next tick"
                        );
                    }
                }
            }
        }
    }
}
