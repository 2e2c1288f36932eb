//! Certificate manager
//!
//! Ties the store, the renewal tracker and the issuer together. Every
//! operation on a domain runs under that domain's lock, so a domain is never
//! issued twice concurrently and readers never observe a half-renewed entry.
//! Operations on different domains proceed independently.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

use super::error::AcmeError;
use super::issuer::Issuer;
use super::storage::{CertificateStorage, RenewalRecord};
use super::tracker::RenewalTracker;

/// Renewal state of one tracked domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenewalStatus {
    pub domain: String,
    pub issued_at: DateTime<Utc>,
    pub renew_after: DateTime<Utc>,
    /// Whether the next scheduler tick will renew it
    pub due: bool,
}

/// Serves certificates from the store and issues missing ones
pub struct CertificateManager {
    storage: Arc<CertificateStorage>,
    tracker: Arc<RenewalTracker>,
    issuer: Arc<dyn Issuer>,
    /// Time between issuance and the renewal deadline
    renew_window: TimeDelta,
    /// Upper bound on a single issuer call
    issue_timeout: Duration,
    /// Per-domain locks, created on first use and kept for the process lifetime
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CertificateManager {
    /// Create a manager
    ///
    /// # Errors
    ///
    /// Returns [`AcmeError::InvalidWindow`] if `renew_after` is shorter than a
    /// second or too large to add to a timestamp.
    pub fn new(
        storage: Arc<CertificateStorage>,
        tracker: Arc<RenewalTracker>,
        issuer: Arc<dyn Issuer>,
        renew_after: Duration,
        issue_timeout: Duration,
    ) -> Result<Self, AcmeError> {
        let renew_window = TimeDelta::from_std(renew_after)
            .map_err(|e| AcmeError::InvalidWindow(format!("{:?}: {}", renew_after, e)))?;
        if renew_window < TimeDelta::seconds(1) {
            return Err(AcmeError::InvalidWindow(format!(
                "{:?} is shorter than one second",
                renew_after
            )));
        }

        debug!(
            renew_after_secs = renew_after.as_secs(),
            issue_timeout_ms = issue_timeout.as_millis() as u64,
            "Created certificate manager"
        );

        Ok(Self {
            storage,
            tracker,
            issuer,
            renew_window,
            issue_timeout,
            locks: DashMap::new(),
        })
    }

    /// Get the certificate store
    pub fn storage(&self) -> &Arc<CertificateStorage> {
        &self.storage
    }

    /// Get the renewal tracker
    pub fn tracker(&self) -> &Arc<RenewalTracker> {
        &self.tracker
    }

    /// Time between issuance and the renewal deadline
    pub fn renew_window(&self) -> TimeDelta {
        self.renew_window
    }

    fn domain_lock(&self, domain: &str) -> Arc<Mutex<()>> {
        // The map guard is released at the end of this statement, before any await
        self.locks
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Return the stored certificate, issuing and storing one on a miss
    ///
    /// Concurrent callers for the same domain wait for a single issuance and
    /// all receive its certificate. Store failures other than a miss are
    /// returned without contacting the issuer.
    pub async fn fetch_or_issue(&self, domain: &str) -> Result<Vec<u8>, AcmeError> {
        let lock = self.domain_lock(domain);
        let _guard = lock.lock().await;

        match self.storage.get(domain) {
            Ok(cert) => {
                trace!(domain = %domain, "Serving cached certificate");
                Ok(cert)
            }
            Err(e) if e.is_not_found() => {
                info!(domain = %domain, "No cached certificate, issuing");
                self.issue_locked(domain).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Issue a certificate for a domain, replacing any stored one
    pub async fn issue(&self, domain: &str) -> Result<Vec<u8>, AcmeError> {
        let lock = self.domain_lock(domain);
        let _guard = lock.lock().await;

        self.issue_locked(domain).await
    }

    /// Drop the stored certificate of a domain and issue a new one
    ///
    /// If issuance fails the domain is left with nothing stored; the next
    /// fetch issues again. The tracker keeps the old, expired record so the
    /// scheduler retries on its next tick.
    pub async fn renew(&self, domain: &str) -> Result<Vec<u8>, AcmeError> {
        let lock = self.domain_lock(domain);
        let _guard = lock.lock().await;

        self.renew_locked(domain).await
    }

    /// Renew a domain unless it stopped being due at `now`
    ///
    /// The deadline is checked again under the domain lock, so a domain
    /// re-issued after the caller looked at the tracker is not issued twice.
    /// Domains without a tracked record are always renewed. Returns whether
    /// a renewal happened.
    pub async fn renew_if_due(&self, domain: &str, now: DateTime<Utc>) -> Result<bool, AcmeError> {
        let lock = self.domain_lock(domain);
        let _guard = lock.lock().await;

        if let Some(record) = self.tracker.get(domain) {
            if !record.is_due(now) {
                debug!(
                    domain = %domain,
                    renew_after = %record.renew_after,
                    "Certificate no longer due, skipping renewal"
                );
                return Ok(false);
            }
        }

        self.renew_locked(domain).await?;
        Ok(true)
    }

    async fn renew_locked(&self, domain: &str) -> Result<Vec<u8>, AcmeError> {
        self.storage.delete(domain)?;
        debug!(domain = %domain, "Removed certificate for renewal");

        self.issue_locked(domain).await
    }

    /// Issue and persist a certificate; the caller holds the domain lock
    async fn issue_locked(&self, domain: &str) -> Result<Vec<u8>, AcmeError> {
        let cert = match tokio::time::timeout(self.issue_timeout, self.issuer.issue(domain)).await
        {
            Ok(Ok(cert)) => cert,
            Ok(Err(e)) => {
                return Err(AcmeError::Issuer {
                    domain: domain.to_string(),
                    source: e,
                })
            }
            Err(_) => {
                return Err(AcmeError::Timeout {
                    domain: domain.to_string(),
                    timeout: self.issue_timeout,
                })
            }
        };

        let record = RenewalRecord::new(Utc::now(), self.renew_window).ok_or_else(|| {
            AcmeError::InvalidWindow(format!("cannot schedule renewal of '{}'", domain))
        })?;

        self.storage.put(domain, &cert)?;
        if let Err(e) = self.storage.put_renewal_record(domain, &record) {
            // A certificate without a record would never be renewed
            if let Err(cleanup) = self.storage.delete(domain) {
                error!(
                    domain = %domain,
                    error = %cleanup,
                    "Failed to remove certificate after renewal record write failed"
                );
            }
            warn!(domain = %domain, error = %e, "Discarded certificate, renewal record not saved");
            return Err(e.into());
        }

        self.tracker.set(domain, record);

        info!(
            domain = %domain,
            renew_after = %record.renew_after,
            "Stored new certificate"
        );
        Ok(cert)
    }

    /// Renewal state of every tracked domain, sorted by name
    pub fn renewal_status(&self, now: DateTime<Utc>) -> Vec<RenewalStatus> {
        self.tracker
            .snapshot()
            .into_iter()
            .map(|(domain, record)| RenewalStatus {
                domain,
                issued_at: record.issued_at,
                renew_after: record.renew_after,
                due: record.is_due(now),
            })
            .collect()
    }
}

impl std::fmt::Debug for CertificateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateManager")
            .field("storage", &self.storage.base_path())
            .field("tracked", &self.tracker.len())
            .field("renew_window", &self.renew_window)
            .field("issue_timeout", &self.issue_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::error::IssuerError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingIssuer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Issuer for CountingIssuer {
        async fn issue(&self, domain: &str) -> Result<Vec<u8>, IssuerError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("CERT:{}:{}", domain, n).into_bytes())
        }
    }

    struct FailingIssuer;

    #[async_trait]
    impl Issuer for FailingIssuer {
        async fn issue(&self, _domain: &str) -> Result<Vec<u8>, IssuerError> {
            Err(IssuerError::new("authority unavailable"))
        }
    }

    struct StalledIssuer;

    #[async_trait]
    impl Issuer for StalledIssuer {
        async fn issue(&self, _domain: &str) -> Result<Vec<u8>, IssuerError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(b"too late".to_vec())
        }
    }

    fn setup_manager(issuer: Arc<dyn Issuer>) -> (TempDir, CertificateManager) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(CertificateStorage::new(temp_dir.path()).unwrap());
        let manager = CertificateManager::new(
            storage,
            Arc::new(RenewalTracker::new()),
            issuer,
            Duration::from_secs(60),
            Duration::from_millis(200),
        )
        .unwrap();
        (temp_dir, manager)
    }

    #[test]
    fn test_window_validation() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(CertificateStorage::new(temp_dir.path()).unwrap());

        let result = CertificateManager::new(
            storage,
            Arc::new(RenewalTracker::new()),
            Arc::new(FailingIssuer),
            Duration::from_millis(500),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(AcmeError::InvalidWindow(_))));
    }

    #[tokio::test]
    async fn test_fetch_issues_once() {
        let issuer = Arc::new(CountingIssuer::default());
        let (_temp_dir, manager) = setup_manager(issuer.clone());

        let first = manager.fetch_or_issue("a.com").await.unwrap();
        let second = manager.fetch_or_issue("a.com").await.unwrap();

        assert_eq!(first, b"CERT:a.com:1");
        assert_eq!(second, first);
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);

        let record = manager.tracker().get("a.com").unwrap();
        assert_eq!(manager.storage().get_renewal_record("a.com").unwrap(), record);
        assert_eq!(record.renew_after - record.issued_at, TimeDelta::seconds(60));
    }

    #[tokio::test]
    async fn test_renew_replaces_certificate() {
        let issuer = Arc::new(CountingIssuer::default());
        let (_temp_dir, manager) = setup_manager(issuer.clone());

        manager.fetch_or_issue("a.com").await.unwrap();
        let renewed = manager.renew("a.com").await.unwrap();

        assert_eq!(renewed, b"CERT:a.com:2");
        assert_eq!(manager.fetch_or_issue("a.com").await.unwrap(), renewed);
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_renew_if_due_rechecks_deadline() {
        let issuer = Arc::new(CountingIssuer::default());
        let (_temp_dir, manager) = setup_manager(issuer.clone());

        // expired record left behind by a failed renewal
        let stale =
            RenewalRecord::new(Utc::now() - TimeDelta::hours(2), TimeDelta::hours(1)).unwrap();
        manager.tracker().set("a.com", stale);

        // a request re-issues the domain before the scheduler gets to it
        manager.fetch_or_issue("a.com").await.unwrap();
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);

        assert!(!manager.renew_if_due("a.com", Utc::now()).await.unwrap());
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.storage().get("a.com").unwrap(), b"CERT:a.com:1");

        let later = Utc::now() + TimeDelta::minutes(2);
        assert!(manager.renew_if_due("a.com", later).await.unwrap());
        assert_eq!(manager.storage().get("a.com").unwrap(), b"CERT:a.com:2");

        // untracked domains are always renewed
        assert!(manager.renew_if_due("b.com", Utc::now()).await.unwrap());
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_issue_overwrites() {
        let issuer = Arc::new(CountingIssuer::default());
        let (_temp_dir, manager) = setup_manager(issuer.clone());

        manager.issue("a.com").await.unwrap();
        manager.issue("a.com").await.unwrap();

        assert_eq!(manager.storage().get("a.com").unwrap(), b"CERT:a.com:2");
    }

    #[tokio::test]
    async fn test_issuer_failure_stores_nothing() {
        let (_temp_dir, manager) = setup_manager(Arc::new(FailingIssuer));

        let err = manager.fetch_or_issue("a.com").await.unwrap_err();
        assert!(matches!(err, AcmeError::Issuer { .. }));
        assert!(err.to_string().contains("authority unavailable"));

        assert!(manager.storage().get("a.com").unwrap_err().is_not_found());
        assert!(manager.tracker().get("a.com").is_none());
    }

    #[tokio::test]
    async fn test_issue_timeout() {
        let (_temp_dir, manager) = setup_manager(Arc::new(StalledIssuer));

        let err = manager.fetch_or_issue("slow.com").await.unwrap_err();
        assert!(matches!(err, AcmeError::Timeout { .. }));
        assert!(manager.storage().list_domains().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_renewal_status() {
        let issuer = Arc::new(CountingIssuer::default());
        let (_temp_dir, manager) = setup_manager(issuer);

        manager.fetch_or_issue("b.com").await.unwrap();
        manager.fetch_or_issue("a.com").await.unwrap();

        let now = Utc::now();
        let status = manager.renewal_status(now);
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].domain, "a.com");
        assert!(!status[0].due);

        let later = manager.renewal_status(now + TimeDelta::minutes(2));
        assert!(later.iter().all(|s| s.due));
    }
}
