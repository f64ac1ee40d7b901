//! ACME certificate lifecycle management
//!
//! Provides unattended TLS certificate issuance and renewal via Let's
//! Encrypt and compatible CAs.
//!
//! # Architecture
//!
//! - [`AcmeClient`] - Wrapper around `instant-acme` driving one issuance
//!   transaction (account, order, challenges, finalization)
//! - [`CertificateStorage`] - Persistent storage for the certificate bundle
//!   and account credentials
//! - [`ChallengeManager`] - Pending HTTP-01 challenges for serving
//! - [`RenewalScheduler`] - Background task checking expiry and renewing
//! - [`inspect`] - Expiry inspection of the stored certificate
//!
//! # Renewal Flow
//!
//! 1. [`RenewalScheduler`] wakes on its interval and asks [`inspect`]
//!    whether the stored certificate is absent, corrupt, or expiring
//! 2. When renewal is needed, [`AcmeClient`] registers (or reuses) the
//!    ACME account and submits an order for the configured domain
//! 3. For each authorization, the HTTP-01 token is published through
//!    [`ChallengeManager`] and served at
//!    `/.well-known/acme-challenge/<token>`
//! 4. Once the CA validates, the order is finalized with a fresh key pair
//!    and CSR, and the issued chain is retrieved
//! 5. [`CertificateStorage`] writes the bundle with per-file
//!    temp-then-rename so a crash never leaves a half-written bundle

mod challenge;
mod client;
mod error;
pub mod inspect;
mod scheduler;
mod storage;

pub use challenge::{ChallengeManager, CHALLENGE_PATH_PREFIX};
pub use client::{AcmeClient, CertificateBundle, CertificateIssuer};
pub use error::{AcmeError, StorageError};
pub use scheduler::RenewalScheduler;
pub use storage::{CertificateStorage, StoredCertificate, CERT_FILE, ISSUER_FILE, KEY_FILE};
