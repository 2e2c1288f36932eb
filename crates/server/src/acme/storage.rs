//! Certificate and renewal record storage
//!
//! Persists issued certificates and their renewal metadata, one directory per
//! domain. The store does not lock: callers serialize operations on the same
//! domain, while operations on different domains touch disjoint directories.
//!
//! # Directory Structure
//!
//! ```text
//! Certdirectory/
//! └── example.com/
//!     ├── example.com       # Certificate blob
//!     └── renewal.yaml      # {CertGeneratedTime, RenewCertAfterTime} as Unix seconds
//! ```
//!
//! Domain names are used as path segments unchecked. A domain named
//! `renewal.yaml` would store its certificate and record in the same file;
//! the HTTP layer refuses it.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::serde::ts_seconds;
use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use super::error::StorageError;

/// File name of the renewal record inside a domain directory
pub const RENEWAL_FILE_NAME: &str = "renewal.yaml";

/// When a certificate was issued and when it becomes due for renewal
///
/// Always satisfies `renew_after > issued_at`. Timestamps have whole-second
/// precision, matching the on-disk format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewalRecord {
    /// When the certificate was issued
    #[serde(rename = "CertGeneratedTime", with = "ts_seconds")]
    pub issued_at: DateTime<Utc>,
    /// When the certificate should be renewed
    #[serde(rename = "RenewCertAfterTime", with = "ts_seconds")]
    pub renew_after: DateTime<Utc>,
}

impl RenewalRecord {
    /// Create a record for a certificate issued at `issued_at`
    ///
    /// Returns `None` if `window` is not positive or the deadline overflows.
    pub fn new(issued_at: DateTime<Utc>, window: TimeDelta) -> Option<Self> {
        if window <= TimeDelta::zero() {
            return None;
        }
        let issued_at = issued_at.trunc_subsecs(0);
        let renew_after = issued_at.checked_add_signed(window)?.trunc_subsecs(0);
        // Sub-second windows collapse to nothing after truncation
        if renew_after <= issued_at {
            return None;
        }
        Some(Self {
            issued_at,
            renew_after,
        })
    }

    /// Whether the certificate is due for renewal at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.renew_after <= now
    }
}

/// Certificate store rooted at the configured directory
///
/// Uses a simple filesystem layout with restrictive permissions. Every blob is
/// written to a temporary sibling and renamed into place, so a reader never
/// sees a partially written certificate or record.
#[derive(Debug)]
pub struct CertificateStorage {
    /// Base storage directory
    base_path: PathBuf,
}

impl CertificateStorage {
    /// Open the store at the given path
    ///
    /// Creates the directory if it doesn't exist and sets restrictive
    /// permissions (0700 on Unix).
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or permissions
    /// cannot be set.
    pub fn new(base_path: &Path) -> Result<Self, StorageError> {
        fs::create_dir_all(base_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(base_path, fs::Permissions::from_mode(0o700))?;
        }

        info!(
            storage_path = %base_path.display(),
            "Initialized certificate storage"
        );

        Ok(Self {
            base_path: base_path.to_path_buf(),
        })
    }

    /// Get the storage base path
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn domain_path(&self, domain: &str) -> PathBuf {
        self.base_path.join(domain)
    }

    fn certificate_path(&self, domain: &str) -> PathBuf {
        self.domain_path(domain).join(domain)
    }

    fn renewal_path(&self, domain: &str) -> PathBuf {
        self.domain_path(domain).join(RENEWAL_FILE_NAME)
    }

    fn ensure_domain_dir(&self, domain: &str) -> Result<PathBuf, StorageError> {
        let domain_path = self.domain_path(domain);
        if !domain_path.is_dir() {
            fs::create_dir_all(&domain_path)?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&domain_path, fs::Permissions::from_mode(0o700))?;
            }
            trace!(domain = %domain, "Created domain directory");
        }
        Ok(domain_path)
    }

    // =========================================================================
    // Certificate Operations
    // =========================================================================

    /// Load the certificate stored for a domain
    ///
    /// Fails with [`StorageError::NotFound`] if nothing is stored.
    pub fn get(&self, domain: &str) -> Result<Vec<u8>, StorageError> {
        match fs::read(self.certificate_path(domain)) {
            Ok(bytes) => {
                trace!(domain = %domain, bytes = bytes.len(), "Loaded stored certificate");
                Ok(bytes)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound {
                domain: domain.to_string(),
                entry: "certificate",
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Store the certificate for a domain, replacing any previous one
    pub fn put(&self, domain: &str, cert: &[u8]) -> Result<(), StorageError> {
        self.ensure_domain_dir(domain)?;
        write_atomic(&self.certificate_path(domain), cert)?;

        debug!(domain = %domain, bytes = cert.len(), "Saved certificate to storage");
        Ok(())
    }

    // =========================================================================
    // Renewal Record Operations
    // =========================================================================

    /// Store the renewal record next to the domain's certificate
    pub fn put_renewal_record(
        &self,
        domain: &str,
        record: &RenewalRecord,
    ) -> Result<(), StorageError> {
        let content = serde_yaml::to_string(record).map_err(|e| StorageError::MalformedRecord {
            domain: domain.to_string(),
            reason: e.to_string(),
        })?;

        self.ensure_domain_dir(domain)?;
        write_atomic(&self.renewal_path(domain), content.as_bytes())?;

        debug!(
            domain = %domain,
            renew_after = %record.renew_after,
            "Saved renewal record"
        );
        Ok(())
    }

    /// Load the renewal record for a domain
    ///
    /// A missing record is [`StorageError::NotFound`]; an unreadable or
    /// inconsistent one is [`StorageError::MalformedRecord`].
    pub fn get_renewal_record(&self, domain: &str) -> Result<RenewalRecord, StorageError> {
        let raw = match fs::read(self.renewal_path(domain)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound {
                    domain: domain.to_string(),
                    entry: "renewal record",
                })
            }
            Err(e) => return Err(e.into()),
        };

        let malformed = |reason: String| StorageError::MalformedRecord {
            domain: domain.to_string(),
            reason,
        };

        let content = String::from_utf8(raw).map_err(|e| malformed(e.to_string()))?;
        let record: RenewalRecord =
            serde_yaml::from_str(&content).map_err(|e| malformed(e.to_string()))?;

        if record.renew_after <= record.issued_at {
            return Err(malformed(format!(
                "renewal time {} is not after issue time {}",
                record.renew_after, record.issued_at
            )));
        }

        trace!(
            domain = %domain,
            renew_after = %record.renew_after,
            "Loaded renewal record"
        );
        Ok(record)
    }

    // =========================================================================
    // Domain Operations
    // =========================================================================

    /// Remove the certificate and renewal record of a domain
    ///
    /// Entries that are already gone are not an error.
    pub fn delete(&self, domain: &str) -> Result<(), StorageError> {
        let mut removed = 0;
        for path in [self.certificate_path(domain), self.renewal_path(domain)] {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        // Best effort: the directory may still hold unrelated files
        let _ = fs::remove_dir(self.domain_path(domain));

        if removed > 0 {
            info!(domain = %domain, "Deleted stored certificate");
        } else {
            trace!(domain = %domain, "Nothing stored to delete");
        }
        Ok(())
    }

    /// List all stored domains
    ///
    /// Returns the names of the directories present under the root when
    /// called; later additions are not reflected.
    pub fn list_domains(&self) -> Result<Vec<String>, StorageError> {
        let mut domains = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    domains.push(name.to_string());
                }
            }
        }

        domains.sort();
        Ok(domains)
    }
}

/// Write a file through a temporary sibling and an atomic rename
fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));

    fs::write(&tmp_path, contents)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600))?;
    }

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    Ok(())
}
