//! Certward daemon library
//!
//! Unattended provisioning and renewal of a TLS certificate for a single
//! domain via the ACME protocol.
//!
//! The daemon runs one background loop: on a fixed interval it inspects the
//! stored certificate and, when it is absent or expiring, drives a full ACME
//! issuance transaction and persists the resulting bundle. A failed cycle is
//! logged and retried at the next interval; it never takes the process down
//! or disturbs the previous bundle on disk.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use certward_daemon::acme::{AcmeClient, CertificateStorage, ChallengeManager, RenewalScheduler};
//!
//! let storage = Arc::new(CertificateStorage::new("tls".as_ref())?);
//! let challenges = ChallengeManager::new();
//! let issuer = Arc::new(AcmeClient::new("admin@example.com", Arc::clone(&storage), challenges));
//!
//! let scheduler = Arc::new(RenewalScheduler::new("example.com", issuer, storage));
//! scheduler.start().await?;
//! ```

pub mod acme;
pub mod responder;

pub use acme::{
    AcmeClient, AcmeError, CertificateBundle, CertificateIssuer, CertificateStorage,
    ChallengeManager, RenewalScheduler, StorageError,
};
