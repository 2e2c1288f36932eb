//! Error types for certificate storage and issuance

use std::time::Duration;
use thiserror::Error;

/// Errors raised by [`CertificateStorage`](super::CertificateStorage)
#[derive(Debug, Error)]
pub enum StorageError {
    /// No certificate or renewal record is stored for the domain
    #[error("no stored {entry} for domain '{domain}'")]
    NotFound { domain: String, entry: &'static str },

    /// The renewal record exists but cannot be used
    #[error("malformed renewal record for domain '{domain}': {reason}")]
    MalformedRecord { domain: String, reason: String },

    /// Reading or writing the store failed
    #[error("certificate store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether this is a cache miss rather than a failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// Failure reported by an [`Issuer`](super::Issuer)
#[derive(Debug, Error)]
#[error("{0}")]
pub struct IssuerError(pub String);

impl IssuerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors raised by the certificate manager
#[derive(Debug, Error)]
pub enum AcmeError {
    /// The certificate store failed
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The certificate authority refused or failed the request
    #[error("certificate issuance failed for '{domain}': {source}")]
    Issuer {
        domain: String,
        #[source]
        source: IssuerError,
    },

    /// The certificate authority did not answer within the bound
    #[error("certificate issuance for '{domain}' timed out after {timeout:?}")]
    Timeout { domain: String, timeout: Duration },

    /// The renewal window cannot be represented as a timestamp offset
    #[error("invalid renewal window: {0}")]
    InvalidWindow(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_cache_miss() {
        let err = StorageError::NotFound {
            domain: "example.com".to_string(),
            entry: "certificate",
        };
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "no stored certificate for domain 'example.com'"
        );

        let err = StorageError::MalformedRecord {
            domain: "example.com".to_string(),
            reason: "truncated".to_string(),
        };
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_storage_error_is_transparent() {
        let err: AcmeError = StorageError::NotFound {
            domain: "a.com".to_string(),
            entry: "renewal record",
        }
        .into();
        assert_eq!(err.to_string(), "no stored renewal record for domain 'a.com'");
    }

    #[test]
    fn test_issuer_error_display() {
        let err = AcmeError::Issuer {
            domain: "a.com".to_string(),
            source: IssuerError::new("rate limited"),
        };
        assert_eq!(
            err.to_string(),
            "certificate issuance failed for 'a.com': rate limited"
        );
    }
}
