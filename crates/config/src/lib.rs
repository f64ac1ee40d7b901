//! Configuration loading and validation for Certward
//!
//! Certward reads a small TOML document describing the certificate it is
//! responsible for:
//!
//! ```toml
//! email = "admin@example.com"
//! domain = "example.com"
//! directory = "tls"
//! port = "80"
//! tls-port = "443"
//! ```
//!
//! Only `email` and `domain` are required; everything else has a default.
//! Validation reports every missing required field at once rather than
//! stopping at the first, so operators can fix a broken file in one pass.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

/// Default certificate storage directory, relative to the working directory.
pub const DEFAULT_DIRECTORY: &str = "tls";

/// Default port for the HTTP-01 challenge responder.
pub const DEFAULT_PORT: &str = "80";

/// Default TLS port.
pub const DEFAULT_TLS_PORT: &str = "443";

/// A single missing required configuration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FieldError {
    /// The ACME account needs a contact email.
    #[error("cannot provision an SSL certificate without an 'email' configuration value")]
    MissingEmail,

    /// The certificate needs a subject domain.
    #[error("cannot provision an SSL certificate without a 'domain' configuration value")]
    MissingDomain,
}

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML.
    #[error("failed to parse configuration file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// One or more required fields are missing. All of them are reported.
    #[error("invalid configuration: {}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Validation(Vec<FieldError>),
}

/// Daemon configuration.
///
/// Loaded once at startup and read-only afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Contact email for the ACME account (required).
    #[serde(default)]
    pub email: String,

    /// Domain the certificate is issued for (required, single domain).
    #[serde(default)]
    pub domain: String,

    /// Directory where certificate material is stored.
    #[serde(default)]
    pub directory: PathBuf,

    /// Port the HTTP-01 challenge responder binds.
    #[serde(default)]
    pub port: String,

    /// TLS port, reserved for TLS-ALPN-01 challenge support.
    #[serde(default, rename = "tls-port")]
    pub tls_port: String,
}

impl Config {
    /// Load, validate and default-fill configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: Config = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        config.apply_defaults();

        Ok(config)
    }

    /// Check that every required field is present.
    ///
    /// Missing fields are aggregated so a file lacking both `email` and
    /// `domain` reports both problems in a single error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();

        if self.email.is_empty() {
            missing.push(FieldError::MissingEmail);
        }

        if self.domain.is_empty() {
            missing.push(FieldError::MissingDomain);
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(missing))
        }
    }

    /// Fill in defaults for optional fields left empty.
    fn apply_defaults(&mut self) {
        if self.directory.as_os_str().is_empty() {
            info!(
                directory = DEFAULT_DIRECTORY,
                "No storage directory configured, using default"
            );
            self.directory = PathBuf::from(DEFAULT_DIRECTORY);
        }

        if self.port.is_empty() {
            self.port = DEFAULT_PORT.to_string();
        }

        if self.tls_port.is_empty() {
            self.tls_port = DEFAULT_TLS_PORT.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Config {
        toml::from_str(raw).unwrap()
    }

    #[test]
    fn test_parse_full_config() {
        let config = parse(
            r#"
email = "admin@example.com"
domain = "example.com"
directory = "/var/lib/certward"
port = "8080"
tls-port = "8443"
"#,
        );

        assert_eq!(config.email, "admin@example.com");
        assert_eq!(config.domain, "example.com");
        assert_eq!(config.directory, PathBuf::from("/var/lib/certward"));
        assert_eq!(config.port, "8080");
        assert_eq!(config.tls_port, "8443");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_applied() {
        let mut config = parse(
            r#"
email = "admin@example.com"
domain = "example.com"
"#,
        );

        config.validate().unwrap();
        config.apply_defaults();

        assert_eq!(config.directory, PathBuf::from(DEFAULT_DIRECTORY));
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.tls_port, DEFAULT_TLS_PORT);
    }

    #[test]
    fn test_missing_email() {
        let config = parse(r#"domain = "example.com""#);

        let err = config.validate().unwrap_err();
        match err {
            ConfigError::Validation(fields) => {
                assert_eq!(fields, vec![FieldError::MissingEmail]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_domain() {
        let config = parse(r#"email = "admin@example.com""#);

        let err = config.validate().unwrap_err();
        match err {
            ConfigError::Validation(fields) => {
                assert_eq!(fields, vec![FieldError::MissingDomain]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_both_aggregated() {
        let config = parse("");

        let err = config.validate().unwrap_err();
        match err {
            ConfigError::Validation(ref fields) => {
                assert_eq!(fields.len(), 2);
                assert!(fields.contains(&FieldError::MissingEmail));
                assert!(fields.contains(&FieldError::MissingDomain));
            }
            other => panic!("unexpected error: {other}"),
        }

        // Both problems must be visible to the operator in one message.
        let message = err.to_string();
        assert!(message.contains("email"));
        assert!(message.contains("domain"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certward.toml");
        std::fs::write(
            &path,
            r#"
email = "admin@example.com"
domain = "example.com"
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.domain, "example.com");
        assert_eq!(config.directory, PathBuf::from(DEFAULT_DIRECTORY));
    }

    #[test]
    fn test_from_file_missing() {
        let err = Config::from_file("/nonexistent/certward.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_from_file_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certward.toml");
        std::fs::write(&path, "email = ").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
