//! In-memory renewal tracker
//!
//! Mirrors the renewal records on disk so the scheduler can find due
//! certificates without touching the store. Shared between the request path,
//! which records fresh issuances, and the scheduler, which scans it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::error::StorageError;
use super::storage::{CertificateStorage, RenewalRecord};

/// Outcome of rebuilding the tracker from the store
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Domains whose renewal record was loaded
    pub loaded: usize,
    /// Domains with a stored certificate but no usable renewal record
    pub orphaned: Vec<String>,
    /// Directories without a readable certificate
    pub skipped: Vec<String>,
}

/// Domain to renewal record map
///
/// Lookups and scans take a read lock; each update replaces one entry under
/// the write lock.
#[derive(Debug, Default)]
pub struct RenewalTracker {
    records: RwLock<HashMap<String, RenewalRecord>>,
}

impl RenewalTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or replace) the renewal record for a domain
    pub fn set(&self, domain: &str, record: RenewalRecord) {
        self.records.write().insert(domain.to_string(), record);
    }

    /// Get the renewal record for a domain
    pub fn get(&self, domain: &str) -> Option<RenewalRecord> {
        self.records.read().get(domain).copied()
    }

    /// Domains whose renewal deadline is at or before `now`, sorted by name
    ///
    /// The result is a copy; renewals run against it without holding the
    /// tracker lock.
    pub fn snapshot_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut expired: Vec<String> = self
            .records
            .read()
            .iter()
            .filter(|(_, record)| record.is_due(now))
            .map(|(domain, _)| domain.clone())
            .collect();
        expired.sort();
        expired
    }

    /// Copy of every tracked domain and its record, sorted by name
    pub fn snapshot(&self) -> Vec<(String, RenewalRecord)> {
        let mut entries: Vec<(String, RenewalRecord)> = self
            .records
            .read()
            .iter()
            .map(|(domain, record)| (domain.clone(), *record))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Number of tracked domains
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether no domain is tracked
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Rebuild the tracker from every domain in the store
    ///
    /// Domains holding a certificate but no readable renewal record are left
    /// out of the tracker and reported as orphaned. A domain whose entries
    /// cannot be read at all is logged and skipped; only a failure to list
    /// the store is fatal. Must run before the server starts accepting
    /// requests.
    pub fn load_from(&self, storage: &CertificateStorage) -> Result<RecoveryReport, StorageError> {
        let mut report = RecoveryReport::default();
        let mut loaded = HashMap::new();

        for domain in storage.list_domains()? {
            match storage.get_renewal_record(&domain) {
                Ok(record) => {
                    debug!(
                        domain = %domain,
                        renew_after = %record.renew_after,
                        "Recovered renewal record"
                    );
                    loaded.insert(domain, record);
                }
                Err(e) => match storage.get(&domain) {
                    Ok(_) => {
                        warn!(
                            domain = %domain,
                            error = %e,
                            "Stored certificate has no usable renewal record"
                        );
                        report.orphaned.push(domain);
                    }
                    Err(cert_err) if cert_err.is_not_found() => {
                        debug!(domain = %domain, "Skipping directory without certificate");
                        report.skipped.push(domain);
                    }
                    Err(cert_err) => {
                        warn!(
                            domain = %domain,
                            error = %cert_err,
                            "Skipping unreadable domain directory"
                        );
                        report.skipped.push(domain);
                    }
                },
            }
        }

        report.loaded = loaded.len();
        *self.records.write() = loaded;

        info!(
            loaded = report.loaded,
            orphaned = report.orphaned.len(),
            skipped = report.skipped.len(),
            "Rebuilt renewal tracker from certificate store"
        );

        Ok(report)
    }
}
