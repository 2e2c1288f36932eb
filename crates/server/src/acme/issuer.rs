//! Certificate issuance
//!
//! The [`Issuer`] trait is the seam between the certificate manager and the
//! certificate authority. The manager bounds every call with a timeout, so an
//! implementation may take as long as the authority needs.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::error::IssuerError;

/// Source of freshly issued certificates
#[async_trait]
pub trait Issuer: Send + Sync {
    /// Obtain a new certificate for `domain`
    async fn issue(&self, domain: &str) -> Result<Vec<u8>, IssuerError>;
}

/// Stand-in certificate authority
///
/// Sleeps for the configured delay and returns `CERT:<domain>`.
#[derive(Debug, Clone)]
pub struct SimulatedIssuer {
    delay: Duration,
}

impl SimulatedIssuer {
    /// Create an issuer that answers after `delay`
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Configured latency
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

#[async_trait]
impl Issuer for SimulatedIssuer {
    async fn issue(&self, domain: &str) -> Result<Vec<u8>, IssuerError> {
        if domain.is_empty() {
            return Err(IssuerError::new("domain name is empty"));
        }

        debug!(domain = %domain, delay_ms = self.delay.as_millis() as u64, "Requesting certificate");
        tokio::time::sleep(self.delay).await;

        info!(domain = %domain, "Certificate issued");
        Ok(format!("CERT:{}", domain).into_bytes())
    }
}
