//! Certkeep configuration
//!
//! The certificate cache receives a fully parsed [`Config`] value at startup.
//! This crate owns loading that value from a YAML file and checking it before
//! any component is built from it.
//!
//! # Example
//!
//! ```yaml
//! http_address: ":8080"
//! Certdirectory: "/var/lib/certkeep/certs"
//! CertRenewAfterMin: "1440m"
//! check_interval: "1m"
//! issue_timeout: "60s"
//! ```
//!
//! `CertRenewAfterMin` also accepts a bare integer, read as a number of
//! minutes.

use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

mod validate;

/// Default configuration file name, relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist
    #[error("missing config file: {0}")]
    Missing(PathBuf),

    /// The configuration file exists but could not be read
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid YAML for [`Config`]
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The configuration parsed but holds unusable values
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Runtime configuration for the certificate cache
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address the HTTP listener binds, e.g. `:8080` or `127.0.0.1:8080`
    #[serde(default = "default_http_address")]
    pub http_address: String,

    /// Root directory of the certificate store
    #[serde(rename = "Certdirectory", alias = "cert_directory")]
    pub cert_directory: PathBuf,

    /// Time after issuance at which a certificate is due for renewal
    #[serde(
        rename = "CertRenewAfterMin",
        alias = "renew_after",
        deserialize_with = "deserialize_renewal_window"
    )]
    pub renew_after: Duration,

    /// How often the renewal scheduler scans for due certificates
    #[serde(default = "default_check_interval", with = "humantime_serde")]
    pub check_interval: Duration,

    /// Upper bound on a single issuer call
    #[serde(default = "default_issue_timeout", with = "humantime_serde")]
    pub issue_timeout: Duration,

    /// Latency of the simulated certificate authority
    #[serde(default = "default_issuer_delay", with = "humantime_serde")]
    pub issuer_delay: Duration,
}

fn default_http_address() -> String {
    ":8080".to_string()
}

fn default_check_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_issue_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_issuer_delay() -> Duration {
    Duration::from_secs(10)
}

/// Accepts either a bare number of minutes or a humantime string.
fn deserialize_renewal_window<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawWindow {
        Minutes(u64),
        Text(String),
    }

    match RawWindow::deserialize(deserializer)? {
        RawWindow::Minutes(minutes) => Ok(Duration::from_secs(minutes.saturating_mul(60))),
        RawWindow::Text(text) => {
            humantime::parse_duration(text.trim()).map_err(serde::de::Error::custom)
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_address: default_http_address(),
            cert_directory: PathBuf::from("certs"),
            renew_after: Duration::from_secs(1440 * 60),
            check_interval: default_check_interval(),
            issue_timeout: default_issue_timeout(),
            issuer_delay: default_issuer_delay(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }

        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

        trace!(path = %path.display(), bytes = source.len(), "Read configuration file");

        let config = Self::from_yaml(&source).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;

        debug!(
            path = %path.display(),
            http_address = %config.http_address,
            cert_directory = %config.cert_directory.display(),
            renew_after_secs = config.renew_after.as_secs(),
            "Loaded configuration"
        );

        Ok(config)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml(source: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(source)
    }

    /// Check the configuration for values the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let problems = validate::collect_problems(self);
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    /// Address in a form the listener accepts
    ///
    /// A leading `:` (listen on every interface) is expanded to `0.0.0.0`.
    pub fn listen_address(&self) -> String {
        let address = self.http_address.trim();
        if address.starts_with(':') {
            format!("0.0.0.0{}", address)
        } else {
            address.to_string()
        }
    }
}
