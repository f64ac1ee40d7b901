//! Stored-certificate expiry inspection.
//!
//! Decides whether a renewal cycle is needed by reading the stored leaf
//! certificate and comparing its notAfter against a safety window. An
//! absent certificate always needs issuance; an unparsable one is reported
//! as corrupt rather than silently re-issued.

use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing::debug;

use super::error::AcmeError;
use super::storage;

/// How close to expiry the certificate may get before renewal triggers.
pub const RENEWAL_WINDOW: Duration = Duration::from_secs(30 * 86_400);

/// Report whether the certificate stored under `directory` is absent,
/// expired, or expiring within [`RENEWAL_WINDOW`].
///
/// Read-only: never touches the directory beyond reading the certificate
/// file.
pub fn needs_certificate(directory: &Path) -> Result<bool, AcmeError> {
    let cert_path = directory.join(storage::CERT_FILE);

    let pem_bytes = match std::fs::read(&cert_path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %cert_path.display(), "no stored certificate, issuance required");
            return Ok(true);
        }
        Err(e) => return Err(AcmeError::Storage(e.into())),
    };

    let not_after = parse_not_after(&pem_bytes).map_err(|reason| AcmeError::CorruptCertificate {
        path: cert_path.clone(),
        reason,
    })?;

    let now = SystemTime::now();
    let expires = SystemTime::UNIX_EPOCH + Duration::from_secs(not_after.max(0) as u64);
    let needs = expires <= now + RENEWAL_WINDOW;

    let expires_utc = chrono::DateTime::<chrono::Utc>::from_timestamp(not_after, 0);
    debug!(
        path = %cert_path.display(),
        expires = ?expires_utc,
        needs_renewal = needs,
        "inspected stored certificate"
    );

    Ok(needs)
}

/// Extract the notAfter timestamp (Unix seconds) from a PEM certificate.
fn parse_not_after(pem_bytes: &[u8]) -> Result<i64, String> {
    let block = pem::parse(pem_bytes).map_err(|e| format!("invalid PEM: {e}"))?;

    let (_, cert) = x509_parser::parse_x509_certificate(block.contents())
        .map_err(|e| format!("invalid X.509 certificate: {e}"))?;

    Ok(cert.validity().not_after.to_datetime().unix_timestamp())
}
