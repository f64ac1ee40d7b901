//! ACME transaction driver built on `instant-acme`.
//!
//! Drives one issuance attempt end to end: account setup, order placement,
//! HTTP-01 challenge publication, validation polling, CSR finalization and
//! certificate retrieval. Each stage fails with a distinct [`AcmeError`]
//! variant so a registration problem reads differently from a finalization
//! one in the logs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use instant_acme::{
    Account, AccountCredentials, Authorization, AuthorizationStatus, ChallengeType, Identifier,
    LetsEncrypt, NewAccount, NewOrder, Order, OrderStatus,
};
use tracing::{debug, info};

use super::challenge::ChallengeManager;
use super::error::AcmeError;
use super::storage::CertificateStorage;

/// Delay between ACME status polls.
const POLL_DELAY: Duration = Duration::from_secs(2);

/// Bound on status polls before an attempt is abandoned.
const MAX_POLL_ATTEMPTS: usize = 30;

/// Environment variable overriding the ACME directory URL (e.g. to point
/// at the Let's Encrypt staging environment or a test CA).
pub const ACME_URL_ENV: &str = "ACME_URL";

/// A freshly issued certificate with its private key.
#[derive(Debug, Clone)]
pub struct CertificateBundle {
    /// Domain the certificate covers.
    pub domain: String,
    /// PEM-encoded certificate chain, leaf first.
    pub cert_pem: String,
    /// PEM-encoded issuer chain (everything after the leaf).
    pub issuer_pem: String,
    /// PEM-encoded private key.
    pub key_pem: String,
    /// PEM-encoded certificate signing request, when one was produced.
    pub csr_pem: Option<String>,
}

/// Anything that can produce a certificate for a domain.
///
/// The production implementation is [`AcmeClient`]; tests substitute a
/// fabricated issuer to exercise the scheduler without network access.
#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    async fn obtain(&self, domain: &str) -> Result<CertificateBundle, AcmeError>;
}

/// ACME protocol client for a single account and domain.
pub struct AcmeClient {
    email: String,
    directory_url: String,
    storage: Arc<CertificateStorage>,
    challenges: ChallengeManager,
}

impl AcmeClient {
    /// Create a client registering (or reusing) an account under `email`.
    ///
    /// The ACME directory defaults to Let's Encrypt production; set the
    /// `ACME_URL` environment variable to target staging or a test CA.
    pub fn new(email: &str, storage: Arc<CertificateStorage>, challenges: ChallengeManager) -> Self {
        let directory_url = std::env::var(ACME_URL_ENV)
            .unwrap_or_else(|_| LetsEncrypt::Production.url().to_string());

        Self {
            email: email.to_string(),
            directory_url,
            storage,
            challenges,
        }
    }

    /// Override the ACME directory URL.
    pub fn with_directory_url(mut self, url: &str) -> Self {
        self.directory_url = url.to_string();
        self
    }

    /// The directory URL this client talks to.
    pub fn directory_url(&self) -> &str {
        &self.directory_url
    }

    /// Load the persisted account, or register a fresh one and persist its
    /// credentials.
    async fn account(&self) -> Result<Account, AcmeError> {
        if let Some(json) = self.storage.load_credentials()? {
            let credentials: AccountCredentials =
                serde_json::from_str(&json).map_err(|e| AcmeError::Account(e.to_string()))?;
            let account = Account::from_credentials(credentials)
                .await
                .map_err(|e| AcmeError::Account(e.to_string()))?;

            debug!("reusing persisted ACME account");
            return Ok(account);
        }

        info!(email = %self.email, "registering new ACME account");

        let contact = format!("mailto:{}", self.email);
        let new_account = NewAccount {
            contact: &[&contact],
            terms_of_service_agreed: true,
            only_return_existing: false,
        };

        let (account, credentials) = Account::create(&new_account, &self.directory_url, None)
            .await
            .map_err(|e| AcmeError::Registration {
                email: self.email.clone(),
                reason: e.to_string(),
            })?;

        let json = serde_json::to_string_pretty(&credentials)
            .map_err(|e| AcmeError::Account(e.to_string()))?;
        self.storage
            .save_credentials(&json)
            .map_err(|e| AcmeError::Account(e.to_string()))?;

        info!(email = %self.email, "ACME account registered");
        Ok(account)
    }

    /// Publish HTTP-01 responses for every pending authorization and wait
    /// until the CA has validated them.
    async fn complete_challenges(
        &self,
        order: &mut Order,
        authorizations: Vec<Authorization>,
    ) -> Result<(), AcmeError> {
        for authz in authorizations {
            match authz.status {
                AuthorizationStatus::Valid => continue,
                AuthorizationStatus::Pending => {}
                status => {
                    return Err(AcmeError::Challenge(format!(
                        "unexpected authorization status: {status:?}"
                    )))
                }
            }

            let challenge = authz
                .challenges
                .iter()
                .find(|c| c.r#type == ChallengeType::Http01)
                .ok_or_else(|| {
                    AcmeError::Challenge(format!(
                        "no HTTP-01 challenge offered for {:?}",
                        authz.identifier
                    ))
                })?;

            let key_authorization = order.key_authorization(challenge);
            self.challenges
                .insert(&challenge.token, key_authorization.as_str());

            let ready = order
                .set_challenge_ready(&challenge.url)
                .await
                .map_err(|e| AcmeError::Challenge(e.to_string()));
            if let Err(e) = ready {
                self.challenges.remove(&challenge.token);
                return Err(e);
            }

            // Withdraw the token whether validation succeeded or not.
            let outcome = self.await_authorization(order, &authz).await;
            self.challenges.remove(&challenge.token);
            outcome?;
        }

        Ok(())
    }

    /// Poll until the given authorization turns valid.
    async fn await_authorization(
        &self,
        order: &mut Order,
        authz: &Authorization,
    ) -> Result<(), AcmeError> {
        for _ in 0..MAX_POLL_ATTEMPTS {
            tokio::time::sleep(POLL_DELAY).await;

            let authorizations = order
                .authorizations()
                .await
                .map_err(|e| AcmeError::Challenge(e.to_string()))?;
            let current = authorizations
                .iter()
                .find(|a| a.identifier == authz.identifier)
                .ok_or_else(|| {
                    AcmeError::Challenge("authorization disappeared from order".to_string())
                })?;

            match current.status {
                AuthorizationStatus::Valid => {
                    info!(identifier = ?authz.identifier, "authorization validated");
                    return Ok(());
                }
                AuthorizationStatus::Invalid => {
                    return Err(AcmeError::Challenge(format!(
                        "authorization failed for {:?}",
                        authz.identifier
                    )));
                }
                _ => {}
            }
        }

        Err(AcmeError::Challenge(
            "timed out waiting for authorization".to_string(),
        ))
    }

    /// Poll until the order is ready for finalization.
    async fn wait_until_ready(&self, order: &mut Order) -> Result<(), AcmeError> {
        for attempt in 0..MAX_POLL_ATTEMPTS {
            let state = order
                .refresh()
                .await
                .map_err(|e| AcmeError::Challenge(e.to_string()))?;

            match state.status {
                OrderStatus::Ready | OrderStatus::Valid => return Ok(()),
                OrderStatus::Invalid => {
                    return Err(AcmeError::Challenge("order became invalid".to_string()));
                }
                _ => {
                    debug!(attempt, "order not ready yet");
                }
            }

            tokio::time::sleep(POLL_DELAY).await;
        }

        Err(AcmeError::Challenge(
            "timed out waiting for order readiness".to_string(),
        ))
    }

    /// Finalize the order with a fresh key pair and CSR, then retrieve the
    /// issued chain.
    async fn finalize(
        &self,
        order: &mut Order,
        domain: &str,
    ) -> Result<(String, String, Option<String>), AcmeError> {
        let mut params = rcgen::CertificateParams::new(vec![domain.to_string()])
            .map_err(|e| AcmeError::Finalization(e.to_string()))?;
        params.distinguished_name = rcgen::DistinguishedName::new();

        let key_pair =
            rcgen::KeyPair::generate().map_err(|e| AcmeError::Finalization(e.to_string()))?;
        let csr = params
            .serialize_request(&key_pair)
            .map_err(|e| AcmeError::Finalization(e.to_string()))?;

        order
            .finalize(csr.der())
            .await
            .map_err(|e| AcmeError::Finalization(e.to_string()))?;

        for _ in 0..MAX_POLL_ATTEMPTS {
            match order
                .certificate()
                .await
                .map_err(|e| AcmeError::Obtain(e.to_string()))?
            {
                Some(cert_pem) => {
                    return Ok((cert_pem, key_pair.serialize_pem(), csr.pem().ok()));
                }
                None => tokio::time::sleep(POLL_DELAY).await,
            }
        }

        Err(AcmeError::Obtain(
            "timed out waiting for issued certificate".to_string(),
        ))
    }
}

#[async_trait]
impl CertificateIssuer for AcmeClient {
    async fn obtain(&self, domain: &str) -> Result<CertificateBundle, AcmeError> {
        info!(domain = %domain, directory = %self.directory_url, "starting certificate issuance");

        let account = self.account().await?;

        let identifiers = [Identifier::Dns(domain.to_string())];
        let mut order = account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .map_err(|e| AcmeError::OrderCreation(e.to_string()))?;

        let authorizations = order
            .authorizations()
            .await
            .map_err(|e| AcmeError::OrderCreation(e.to_string()))?;

        self.complete_challenges(&mut order, authorizations).await?;
        self.wait_until_ready(&mut order).await?;

        let (cert_pem, key_pem, csr_pem) = self.finalize(&mut order, domain).await?;
        let issuer_pem = split_issuer_chain(&cert_pem).map_err(AcmeError::Obtain)?;

        info!(domain = %domain, "certificate issued");

        Ok(CertificateBundle {
            domain: domain.to_string(),
            cert_pem,
            issuer_pem,
            key_pem,
            csr_pem,
        })
    }
}

/// Split the issuer material off a leaf-first PEM chain.
///
/// The CA returns the whole chain in one document; TLS terminators expect
/// the issuer material at its own predictable path.
fn split_issuer_chain(chain_pem: &str) -> Result<String, String> {
    let blocks =
        pem::parse_many(chain_pem).map_err(|e| format!("unparsable certificate chain: {e}"))?;

    if blocks.is_empty() {
        return Err("certificate chain is empty".to_string());
    }

    Ok(blocks.iter().skip(1).map(pem::encode).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::storage::CertificateStorage;
    use tempfile::TempDir;

    fn self_signed_pem(domain: &str) -> String {
        let key = rcgen::KeyPair::generate().unwrap();
        let params = rcgen::CertificateParams::new(vec![domain.to_string()]).unwrap();
        params.self_signed(&key).unwrap().pem()
    }

    #[test]
    fn test_split_single_block_chain() {
        let chain = self_signed_pem("example.com");
        let issuer = split_issuer_chain(&chain).unwrap();
        assert!(issuer.is_empty());
    }

    #[test]
    fn test_split_two_block_chain() {
        let leaf = self_signed_pem("example.com");
        let intermediate = self_signed_pem("ca.example.com");
        let chain = format!("{leaf}{intermediate}");

        let issuer = split_issuer_chain(&chain).unwrap();

        let issuer_blocks = pem::parse_many(&issuer).unwrap();
        assert_eq!(issuer_blocks.len(), 1);
        assert_eq!(
            issuer_blocks[0].contents(),
            pem::parse(&intermediate).unwrap().contents()
        );
    }

    #[test]
    fn test_split_empty_chain_is_error() {
        assert!(split_issuer_chain("").is_err());
    }

    #[test]
    fn test_directory_url_override() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(CertificateStorage::new(dir.path()).unwrap());

        let client = AcmeClient::new("admin@example.com", storage, ChallengeManager::new())
            .with_directory_url("https://acme-staging-v02.api.letsencrypt.org/directory");

        assert_eq!(
            client.directory_url(),
            "https://acme-staging-v02.api.letsencrypt.org/directory"
        );
    }
}
