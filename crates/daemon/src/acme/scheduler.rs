//! Background certificate renewal scheduler.
//!
//! Periodically inspects the stored certificate and drives a renewal
//! attempt when it is absent or expiring. Failures are isolated per cycle:
//! a failed inspection, issuance, or store write is logged and retried at
//! the next tick, never escalated.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::client::CertificateIssuer;
use super::error::AcmeError;
use super::inspect;
use super::storage::CertificateStorage;

/// Default check interval (24 hours).
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(24 * 3600);

/// Background renewal scheduler.
///
/// Constructed Running and moved to Closed exactly once by
/// [`RenewalScheduler::close`]. Closing never interrupts a cycle already in
/// flight; it only prevents the next one from starting.
pub struct RenewalScheduler {
    domain: String,
    issuer: Arc<dyn CertificateIssuer>,
    storage: Arc<CertificateStorage>,
    check_interval: Duration,
    closed: AtomicBool,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RenewalScheduler {
    /// Create a scheduler for `domain` with the default 24-hour interval.
    pub fn new(
        domain: &str,
        issuer: Arc<dyn CertificateIssuer>,
        storage: Arc<CertificateStorage>,
    ) -> Self {
        Self {
            domain: domain.to_string(),
            issuer,
            storage,
            check_interval: DEFAULT_CHECK_INTERVAL,
            closed: AtomicBool::new(false),
            shutdown: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Set the check interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Spawn the renewal loop.
    ///
    /// The first check runs immediately; afterwards the loop wakes on the
    /// configured interval until [`RenewalScheduler::close`] is called.
    pub async fn start(self: Arc<Self>) -> Result<(), AcmeError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AcmeError::AlreadyClosed);
        }

        let mut shutdown_slot = self.shutdown.lock().await;
        if shutdown_slot.is_some() {
            warn!("renewal scheduler already started");
            return Ok(());
        }

        let (tx, mut rx) = oneshot::channel();
        *shutdown_slot = Some(tx);
        drop(shutdown_slot);

        let this = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            info!(
                domain = %this.domain,
                interval_secs = this.check_interval.as_secs(),
                "starting certificate renewal scheduler"
            );

            let mut ticker = tokio::time::interval(this.check_interval);
            // A cycle longer than the interval must not cause catch-up ticks.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if this.closed.load(Ordering::SeqCst) {
                            break;
                        }
                        this.run_cycle().await;
                    }
                    _ = &mut rx => {
                        info!("renewal scheduler shutting down");
                        break;
                    }
                }
            }
        });
        *self.task.lock().await = Some(handle);

        Ok(())
    }

    /// Request shutdown.
    ///
    /// The first call flips the state and wakes the loop; subsequent calls
    /// report [`AcmeError::AlreadyClosed`]. Safe to call while a cycle is
    /// running: the in-flight cycle finishes naturally.
    pub async fn close(&self) -> Result<(), AcmeError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(AcmeError::AlreadyClosed);
        }

        if let Some(tx) = self.shutdown.lock().await.take() {
            let _ = tx.send(());
        }

        info!(domain = %self.domain, "renewal scheduler closed");
        Ok(())
    }

    /// Whether shutdown has been requested.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait for the background loop to finish.
    ///
    /// Call after [`RenewalScheduler::close`] so an in-flight renewal cycle
    /// can complete before the process exits.
    pub async fn join(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// One check-and-maybe-renew cycle.
    ///
    /// Every failure path returns after logging; the loop decides when to
    /// try again.
    async fn run_cycle(&self) {
        let needs = match inspect::needs_certificate(self.storage.base_path()) {
            Ok(needs) => needs,
            Err(e) => {
                error!(domain = %self.domain, error = %e, "error checking stored certificate");
                return;
            }
        };

        if !needs {
            debug!(domain = %self.domain, "certificate is still valid");
            return;
        }

        info!(
            domain = %self.domain,
            "certificate is absent or expiring soon, starting renewal"
        );

        let bundle = match self.issuer.obtain(&self.domain).await {
            Ok(bundle) => bundle,
            Err(e) => {
                error!(domain = %self.domain, error = %e, "certificate renewal failed");
                return;
            }
        };

        if let Err(e) = self.storage.save(&bundle) {
            error!(domain = %self.domain, error = %e, "failed to persist certificate bundle");
            return;
        }

        info!(domain = %self.domain, "certificate renewal completed");
    }
}

impl std::fmt::Debug for RenewalScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewalScheduler")
            .field("domain", &self.domain)
            .field("check_interval", &self.check_interval)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::client::CertificateBundle;
    use crate::acme::storage;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;
    use time::{Duration as TimeDuration, OffsetDateTime};

    /// Issuer returning a far-future self-signed bundle.
    struct StubIssuer {
        calls: AtomicUsize,
    }

    impl StubIssuer {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CertificateIssuer for StubIssuer {
        async fn obtain(&self, domain: &str) -> Result<CertificateBundle, AcmeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(fabricated_bundle(domain))
        }
    }

    /// Issuer failing at the registration stage.
    struct FailingIssuer {
        calls: AtomicUsize,
    }

    impl FailingIssuer {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CertificateIssuer for FailingIssuer {
        async fn obtain(&self, domain: &str) -> Result<CertificateBundle, AcmeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AcmeError::Registration {
                email: format!("admin@{domain}"),
                reason: "simulated rejection".to_string(),
            })
        }
    }

    fn fabricated_bundle(domain: &str) -> CertificateBundle {
        let now = OffsetDateTime::now_utc();
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(vec![domain.to_string()]).unwrap();
        params.not_before = now - TimeDuration::days(1);
        params.not_after = now + TimeDuration::days(90);
        let cert = params.self_signed(&key).unwrap();

        CertificateBundle {
            domain: domain.to_string(),
            cert_pem: cert.pem(),
            issuer_pem: cert.pem(),
            key_pem: key.serialize_pem(),
            csr_pem: None,
        }
    }

    fn setup(issuer: Arc<dyn CertificateIssuer>) -> (TempDir, RenewalScheduler) {
        let dir = TempDir::new().unwrap();
        let cert_storage = Arc::new(CertificateStorage::new(dir.path()).unwrap());
        let scheduler = RenewalScheduler::new("example.com", issuer, cert_storage);
        (dir, scheduler)
    }

    #[tokio::test]
    async fn test_cycle_issues_and_persists() {
        let issuer = Arc::new(StubIssuer::new());
        let (dir, scheduler) = setup(issuer.clone());

        // Empty directory: the cycle must issue and persist a bundle.
        scheduler.run_cycle().await;

        assert_eq!(issuer.calls(), 1);
        assert!(dir.path().join(storage::CERT_FILE).exists());
        assert!(dir.path().join(storage::ISSUER_FILE).exists());
        assert!(dir.path().join(storage::KEY_FILE).exists());

        // The stored far-future certificate satisfies the next inspection.
        assert!(!inspect::needs_certificate(dir.path()).unwrap());
    }

    #[tokio::test]
    async fn test_no_renewal_when_certificate_valid() {
        let issuer = Arc::new(StubIssuer::new());
        let (dir, scheduler) = setup(issuer.clone());

        let cert_storage = CertificateStorage::new(dir.path()).unwrap();
        cert_storage.save(&fabricated_bundle("example.com")).unwrap();

        scheduler.run_cycle().await;

        assert_eq!(issuer.calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_issuance_writes_nothing() {
        let issuer = Arc::new(FailingIssuer::new());
        let (dir, scheduler) = setup(issuer.clone());

        scheduler.run_cycle().await;

        assert_eq!(issuer.calls(), 1);
        assert!(!dir.path().join(storage::CERT_FILE).exists());
        assert!(!dir.path().join(storage::KEY_FILE).exists());
    }

    #[tokio::test]
    async fn test_loop_survives_failed_cycles() {
        let issuer = Arc::new(FailingIssuer::new());
        let (dir, scheduler) = setup(issuer.clone());
        let scheduler = Arc::new(scheduler.with_interval(Duration::from_millis(10)));

        scheduler.clone().start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        scheduler.close().await.unwrap();
        scheduler.join().await;

        // A failing issuer must not stop the loop: several cycles ran.
        assert!(issuer.calls() >= 2, "only {} cycles ran", issuer.calls());
        assert!(!dir.path().join(storage::CERT_FILE).exists());
    }

    #[tokio::test]
    async fn test_close_twice_reports_already_closed() {
        let issuer = Arc::new(StubIssuer::new());
        let (_dir, scheduler) = setup(issuer);
        let scheduler = Arc::new(scheduler);

        scheduler.clone().start().await.unwrap();

        scheduler.close().await.unwrap();
        let err = scheduler.close().await.unwrap_err();
        assert!(matches!(err, AcmeError::AlreadyClosed));
        assert!(scheduler.is_closed());
    }

    #[tokio::test]
    async fn test_closed_scheduler_starts_no_cycles() {
        let issuer = Arc::new(FailingIssuer::new());
        let (_dir, scheduler) = setup(issuer.clone());
        let scheduler = Arc::new(scheduler.with_interval(Duration::from_millis(10)));

        scheduler.clone().start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.close().await.unwrap();

        // Once the loop has drained, the cycle count must be frozen.
        scheduler.join().await;
        let settled = issuer.calls();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(issuer.calls(), settled);
    }

    #[tokio::test]
    async fn test_start_after_close_is_rejected() {
        let issuer = Arc::new(StubIssuer::new());
        let (_dir, scheduler) = setup(issuer);
        let scheduler = Arc::new(scheduler);

        scheduler.close().await.unwrap();

        let err = scheduler.clone().start().await.unwrap_err();
        assert!(matches!(err, AcmeError::AlreadyClosed));
    }
}
