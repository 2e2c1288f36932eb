//! Configuration validation
//!
//! Checks values that deserialize fine but that the server cannot run with.

use crate::Config;
use std::time::Duration;
use tracing::trace;

/// Shortest usable renewal window
const MIN_RENEWAL_WINDOW: Duration = Duration::from_secs(1);

/// Collect every problem with the configuration, in field order
pub(crate) fn collect_problems(config: &Config) -> Vec<String> {
    let mut problems = Vec::new();

    check_address(&config.http_address, &mut problems);

    if config.cert_directory.as_os_str().is_empty() {
        problems.push("Certdirectory must not be empty".to_string());
    }

    // Renewal records keep whole seconds
    check_at_least(
        "CertRenewAfterMin",
        config.renew_after,
        MIN_RENEWAL_WINDOW,
        &mut problems,
    );
    check_positive("check_interval", config.check_interval, &mut problems);
    check_positive("issue_timeout", config.issue_timeout, &mut problems);

    trace!(problem_count = problems.len(), "Validated configuration");
    problems
}

fn check_address(address: &str, problems: &mut Vec<String>) {
    let address = address.trim();
    let Some((_, port)) = address.rsplit_once(':') else {
        problems.push(format!(
            "http_address '{}' needs a port, e.g. \":8080\"",
            address
        ));
        return;
    };
    if port.parse::<u16>().is_err() {
        problems.push(format!("http_address '{}' has an invalid port", address));
    }
}

fn check_at_least(name: &str, value: Duration, min: Duration, problems: &mut Vec<String>) {
    if value < min {
        problems.push(format!(
            "{} must be at least {}, got {}",
            name,
            humantime::format_duration(min),
            humantime::format_duration(value)
        ));
    }
}

fn check_positive(name: &str, value: Duration, problems: &mut Vec<String>) {
    if value.is_zero() {
        problems.push(format!("{} must be greater than zero", name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConfigError;
    use std::path::PathBuf;

    #[test]
    fn test_default_is_valid() {
        assert!(collect_problems(&Config::default()).is_empty());
    }

    #[test]
    fn test_zero_durations_rejected() {
        let config = Config {
            renew_after: Duration::ZERO,
            check_interval: Duration::ZERO,
            ..Default::default()
        };

        let problems = collect_problems(&config);
        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("CertRenewAfterMin"));
        assert!(problems[1].contains("check_interval"));
    }

    #[test]
    fn test_subsecond_renewal_window_rejected() {
        let config = Config {
            renew_after: Duration::from_millis(500),
            ..Default::default()
        };

        let problems = collect_problems(&config);
        assert_eq!(problems.len(), 1);
        assert_eq!(
            problems[0],
            "CertRenewAfterMin must be at least 1s, got 500ms"
        );

        let config = Config {
            renew_after: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(collect_problems(&config).is_empty());
    }

    #[test]
    fn test_bad_address_rejected() {
        let config = Config {
            http_address: "localhost".to_string(),
            ..Default::default()
        };
        assert!(collect_problems(&config)[0].contains("needs a port"));

        let config = Config {
            http_address: "localhost:http".to_string(),
            ..Default::default()
        };
        assert!(collect_problems(&config)[0].contains("invalid port"));
    }

    #[test]
    fn test_validate_reports_all_problems() {
        let config = Config {
            cert_directory: PathBuf::new(),
            issue_timeout: Duration::ZERO,
            ..Default::default()
        };

        let err = config.validate().unwrap_err();
        let ConfigError::Invalid(problems) = &err else {
            panic!("expected invalid configuration, got {err:?}");
        };
        assert_eq!(problems.len(), 2);
        assert!(err.to_string().contains("Certdirectory must not be empty"));
        assert!(err.to_string().contains("issue_timeout"));
    }
}
