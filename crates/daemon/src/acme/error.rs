//! Error types for the ACME certificate lifecycle.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from persistent certificate and account storage.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem failure while reading or writing stored material.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Account credentials could not be serialized or deserialized.
    #[error("invalid account credentials: {0}")]
    Credentials(#[from] serde_json::Error),
}

/// Errors raised while driving the certificate lifecycle.
///
/// Transaction failures carry the stage they happened in, so an operator
/// can tell a registration problem from a finalization one at a glance.
#[derive(Debug, Error)]
pub enum AcmeError {
    /// Account credential handling failed (loading, persisting, restoring).
    #[error("error preparing ACME account: {0}")]
    Account(String),

    /// The ACME server rejected or failed account registration.
    #[error("error registering ACME account for \"{email}\": {reason}")]
    Registration { email: String, reason: String },

    /// Order submission was refused.
    #[error("error creating ACME order: {0}")]
    OrderCreation(String),

    /// Challenge setup, validation, or readiness polling failed.
    #[error("error completing ACME challenge: {0}")]
    Challenge(String),

    /// CSR construction or order finalization failed.
    #[error("error finalizing ACME order: {0}")]
    Finalization(String),

    /// The issued certificate could not be retrieved or decoded.
    #[error("error obtaining issued certificate: {0}")]
    Obtain(String),

    /// A stored certificate exists but cannot be parsed.
    ///
    /// Reported distinctly from an absent certificate so corruption is
    /// visible to operators instead of silently triggering re-issuance.
    #[error("stored certificate {path:?} is unreadable: {reason}")]
    CorruptCertificate { path: PathBuf, reason: String },

    /// Storage failure surfaced through the lifecycle.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// `close()` was called on a scheduler that is already closed.
    #[error("renewal scheduler is already closed")]
    AlreadyClosed,
}
