//! Certkeep Server Library
//!
//! A per-domain TLS certificate cache with background renewal, built on Pingora.
//!
//! This library provides:
//!
//! - **Certificate Store**: One directory per domain holding the certificate and its renewal record
//! - **Renewal Tracking**: In-memory deadlines rebuilt from the store on startup
//! - **Issuance**: Single-flight issuance per domain, bounded by a timeout
//! - **Renewal Scheduling**: A background service renewing expired certificates
//! - **HTTP Surface**: `GET /cert/{domain}` and friends
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use certkeep_config::Config;
//! use certkeep_server::{AppState, SimulatedIssuer};
//!
//! let config = Config::from_file("config.yaml")?;
//! let issuer = Arc::new(SimulatedIssuer::new(config.issuer_delay));
//! let state = AppState::new(config, issuer)?;
//!
//! let cert = state.manager.fetch_or_issue("example.com").await?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
pub mod app;
pub mod handlers;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Certificate lifecycle
pub use acme::{
    AcmeError, CertificateManager, CertificateStorage, Issuer, IssuerError, RenewalRecord,
    RenewalScheduler, RenewalTracker, SimulatedIssuer, StorageError,
};

// Application wiring
pub use app::AppState;
pub use handlers::CertHttpApp;
