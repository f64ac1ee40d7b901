//! Pending HTTP-01 challenge tracking.
//!
//! While an order is being validated, the transaction driver publishes
//! `token -> key authorization` pairs here and the HTTP responder serves
//! them at `/.well-known/acme-challenge/<token>`.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace};

/// URL path prefix the ACME server fetches during HTTP-01 validation.
pub const CHALLENGE_PATH_PREFIX: &str = "/.well-known/acme-challenge/";

/// Shared table of pending HTTP-01 challenges.
///
/// Clones share state, so the driver and the responder can hold the same
/// table across tasks. `DashMap` keeps lookups lock-free on the serving
/// path.
#[derive(Debug, Default)]
pub struct ChallengeManager {
    entries: Arc<DashMap<String, String>>,
}

impl ChallengeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a challenge for the responder to serve.
    pub fn insert(&self, token: &str, key_authorization: &str) {
        debug!(token = %token, "publishing HTTP-01 challenge");
        self.entries
            .insert(token.to_string(), key_authorization.to_string());
    }

    /// Withdraw a challenge once validation has finished, either way.
    pub fn remove(&self, token: &str) {
        if self.entries.remove(token).is_some() {
            debug!(token = %token, "withdrew HTTP-01 challenge");
        }
    }

    /// Response body for a token, if that token is pending.
    pub fn response(&self, token: &str) -> Option<String> {
        let found = self.entries.get(token).map(|entry| entry.clone());
        trace!(token = %token, hit = found.is_some(), "challenge lookup");
        found
    }

    /// Number of challenges currently pending.
    pub fn pending(&self) -> usize {
        self.entries.len()
    }
}

impl Clone for ChallengeManager {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}
