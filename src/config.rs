//! Purpose: Turn operator-facing upstream settings into a validated `SoapConfig`.
//! Exports: `UpstreamSettings`, `read_secret_file`.
//! Role: Shared by `serve` and `call`; the CLI fills settings from flags and environment.
//! Invariants: Misconfiguration is `ErrorKind::Usage` and is reported before any network I/O.
//! Invariants: Secret values are never echoed in messages or hints.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

use crate::core::error::{Error, ErrorKind};
use crate::soap::{Credentials, SoapConfig};

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Upstream options as given by the operator; carries the password.
#[derive(Clone, Default)]
pub struct UpstreamSettings {
    pub wsdl_url: Option<String>,
    pub endpoint: Option<String>,
    pub login: Option<String>,
    pub password: Option<String>,
    pub password_file: Option<PathBuf>,
    pub timeout_ms: Option<u64>,
}

impl UpstreamSettings {
    pub fn into_soap_config(self) -> Result<SoapConfig, Error> {
        let Some(wsdl_url) = self.wsdl_url.filter(|url| !url.trim().is_empty()) else {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("missing upstream WSDL URL")
                .with_hint("Pass --wsdl-url or set WSDL_URL."));
        };

        let mut config = SoapConfig::new(wsdl_url.trim())?;
        if let Some(endpoint) = self.endpoint.as_deref() {
            config = config.with_endpoint(endpoint)?;
        }

        let timeout_ms = self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
        if timeout_ms == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("--timeout-ms must be greater than zero")
                .with_hint("Use a positive value like 30000."));
        }
        config = config.with_timeout(Duration::from_millis(timeout_ms));

        let password = match (self.password, self.password_file) {
            (Some(_), Some(_)) => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("--password cannot be combined with --password-file")
                    .with_hint("Use --password-file for safer handling."));
            }
            (Some(password), None) => Some(password),
            (None, Some(path)) => Some(read_secret_file(&path)?),
            (None, None) => None,
        };

        match (self.login, password) {
            (Some(login), Some(password)) => {
                config = config.with_credentials(Credentials::new(login, password));
            }
            (Some(_), None) => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("--login requires a password")
                    .with_hint("Pass --password-file or set WSDL_PASSWORD."));
            }
            (None, Some(_)) => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("a password was given without --login")
                    .with_hint("Pass --login or set WSDL_LOGIN."));
            }
            (None, None) => warn!("no upstream credentials configured; calling without Basic auth"),
        }

        Ok(config)
    }
}

pub fn read_secret_file(path: &Path) -> Result<String, Error> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("failed to read secret file {}", path.display()))
            .with_source(err)
    })?;
    let secret = raw.trim().to_string();
    if secret.is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("secret file {} is empty", path.display())));
    }
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::{UpstreamSettings, read_secret_file};
    use crate::core::error::ErrorKind;
    use std::time::Duration;

    fn settings() -> UpstreamSettings {
        UpstreamSettings {
            wsdl_url: Some("http://10.0.0.5/base/ws/queue.1cws?wsdl".to_string()),
            ..UpstreamSettings::default()
        }
    }

    #[test]
    fn wsdl_url_is_required() {
        let err = UpstreamSettings::default()
            .into_soap_config()
            .expect_err("missing url");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(err.hint(), Some("Pass --wsdl-url or set WSDL_URL."));
    }

    #[test]
    fn defaults_apply_timeout_and_no_credentials() {
        let config = settings().into_soap_config().expect("config");
        assert_eq!(config.timeout, Duration::from_millis(30_000));
        assert!(config.credentials.is_none());
        assert!(config.endpoint.is_none());
    }

    #[test]
    fn password_file_is_trimmed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("wsdl-password");
        std::fs::write(&path, "s3cret\n").expect("write");

        assert_eq!(read_secret_file(&path).expect("secret"), "s3cret");

        let config = UpstreamSettings {
            login: Some("web".to_string()),
            password_file: Some(path),
            ..settings()
        }
        .into_soap_config()
        .expect("config");
        let credentials = config.credentials.expect("credentials");
        assert_eq!(credentials.login(), "web");
    }

    #[test]
    fn empty_password_file_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("empty");
        std::fs::write(&path, "  \n").expect("write");
        let err = read_secret_file(&path).expect_err("empty");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn conflicting_or_partial_credentials_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("pw");
        std::fs::write(&path, "x").expect("write");

        let both = UpstreamSettings {
            login: Some("web".to_string()),
            password: Some("x".to_string()),
            password_file: Some(path),
            ..settings()
        };
        assert_eq!(
            both.into_soap_config().expect_err("both").kind(),
            ErrorKind::Usage
        );

        let login_only = UpstreamSettings {
            login: Some("web".to_string()),
            ..settings()
        };
        assert_eq!(
            login_only.into_soap_config().expect_err("login only").kind(),
            ErrorKind::Usage
        );
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = UpstreamSettings {
            timeout_ms: Some(0),
            ..settings()
        }
        .into_soap_config()
        .expect_err("timeout");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
