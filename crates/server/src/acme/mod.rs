//! Certificate cache and renewal lifecycle
//!
//! # Architecture
//!
//! - [`CertificateStorage`] - Persistent per-domain store for certificates and renewal records
//! - [`RenewalTracker`] - In-memory index of renewal deadlines, rebuilt from the store at startup
//! - [`Issuer`] - Seam to the certificate authority ([`SimulatedIssuer`] stands in for it)
//! - [`CertificateManager`] - Serves certificates, issuing on a miss under a per-domain lock
//! - [`RenewalScheduler`] - Background service renewing certificates past their deadline
//!
//! # Renewal Flow
//!
//! 1. A request misses the store and [`CertificateManager`] asks the [`Issuer`]
//! 2. The certificate and its renewal record are persisted, then tracked
//! 3. Each tick, [`RenewalScheduler`] snapshots the domains past their deadline
//! 4. Each due domain is deleted and re-issued under its lock
//! 5. A failed renewal leaves the domain empty and its record expired, so it is retried

mod error;
mod issuer;
mod manager;
mod scheduler;
mod storage;
mod tracker;

pub use error::{AcmeError, IssuerError, StorageError};
pub use issuer::{Issuer, SimulatedIssuer};
pub use manager::{CertificateManager, RenewalStatus};
pub use scheduler::{RenewalScheduler, RenewalSummary};
pub use storage::{CertificateStorage, RenewalRecord, RENEWAL_FILE_NAME};
pub use tracker::{RecoveryReport, RenewalTracker};
