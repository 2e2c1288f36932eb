//! Application state
//!
//! Builds the certificate store, tracker and manager from configuration and
//! recovers renewal state before the server accepts requests.

use std::sync::Arc;

use certkeep_config::Config;
use tracing::{info, warn};

use crate::acme::{
    AcmeError, CertificateManager, CertificateStorage, Issuer, RecoveryReport, RenewalScheduler,
    RenewalTracker,
};

/// Everything the HTTP surface and the scheduler share
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub storage: Arc<CertificateStorage>,
    pub tracker: Arc<RenewalTracker>,
    pub manager: Arc<CertificateManager>,
    /// What startup recovery found in the store
    pub recovery: RecoveryReport,
}

impl AppState {
    /// Open the store, rebuild the tracker from it and create the manager
    ///
    /// # Errors
    ///
    /// Fails if the store directory cannot be opened or listed, or if the
    /// renewal window is unusable.
    pub fn new(config: Config, issuer: Arc<dyn Issuer>) -> Result<Self, AcmeError> {
        let storage = Arc::new(CertificateStorage::new(&config.cert_directory)?);

        let tracker = Arc::new(RenewalTracker::new());
        let recovery = tracker.load_from(&storage)?;
        if !recovery.orphaned.is_empty() {
            warn!(
                domains = ?recovery.orphaned,
                "Certificates without renewal records will be renewed on the first check"
            );
        }

        let manager = Arc::new(CertificateManager::new(
            storage.clone(),
            tracker.clone(),
            issuer,
            config.renew_after,
            config.issue_timeout,
        )?);

        info!(
            cert_directory = %config.cert_directory.display(),
            tracked = tracker.len(),
            "Certificate cache ready"
        );

        Ok(Self {
            config: Arc::new(config),
            storage,
            tracker,
            manager,
            recovery,
        })
    }

    /// Scheduler for the configured interval, seeded with orphaned certificates
    pub fn renewal_scheduler(&self) -> RenewalScheduler {
        RenewalScheduler::new(self.manager.clone())
            .with_interval(self.config.check_interval)
            .with_pending(self.recovery.orphaned.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::SimulatedIssuer;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> Config {
        Config {
            cert_directory: dir.path().join("certs"),
            renew_after: Duration::from_secs(60),
            check_interval: Duration::from_secs(5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_state_shares_tracker() {
        let temp_dir = TempDir::new().unwrap();
        let state = AppState::new(
            config(&temp_dir),
            Arc::new(SimulatedIssuer::new(Duration::ZERO)),
        )
        .unwrap();

        assert!(state.tracker.is_empty());
        state.manager.fetch_or_issue("a.com").await.unwrap();
        assert!(state.tracker.get("a.com").is_some());
        assert_eq!(state.storage.get("a.com").unwrap(), b"CERT:a.com");
    }

    #[test]
    fn test_scheduler_uses_config_interval() {
        let temp_dir = TempDir::new().unwrap();
        let state = AppState::new(
            config(&temp_dir),
            Arc::new(SimulatedIssuer::new(Duration::ZERO)),
        )
        .unwrap();

        assert_eq!(
            state.renewal_scheduler().check_interval(),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_unreadable_domain_does_not_abort_startup() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir);
        std::fs::create_dir_all(config.cert_directory.join("x").join("x")).unwrap();

        let state =
            AppState::new(config, Arc::new(SimulatedIssuer::new(Duration::ZERO))).unwrap();

        assert!(state.tracker.is_empty());
        assert_eq!(state.recovery.skipped, vec!["x".to_string()]);
        assert!(state.recovery.orphaned.is_empty());
    }

    #[test]
    fn test_invalid_window_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            renew_after: Duration::ZERO,
            ..config(&temp_dir)
        };

        let result = AppState::new(config, Arc::new(SimulatedIssuer::new(Duration::ZERO)));
        assert!(matches!(result, Err(AcmeError::InvalidWindow(_))));
    }
}
