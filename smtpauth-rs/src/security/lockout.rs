//! Failed-login lockout
//!
//! The authenticator asks a [`LoginLockout`] whether an attempt may proceed
//! before touching the network, and reports every outcome back to it.
//! Counting policy belongs to the implementation:
//! - [`NoLockout`]: never blocks
//! - [`FailedLoginTracker`]: sliding window of failures per login and per IP
//!
//! # Example
//! ```no_run
//! use smtpauth_rs::identity::AuthContext;
//! use smtpauth_rs::security::{FailedLoginTracker, LoginLockout};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let tracker = FailedLoginTracker::new(5, Duration::from_secs(3600));
//! let context = AuthContext::default();
//!
//! if tracker.is_locked("user@example.com", &context).await {
//!     println!("Too many failed logins");
//! }
//! # }
//! ```

use crate::identity::AuthContext;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Lockout counter owned by the surrounding platform
#[async_trait::async_trait]
pub trait LoginLockout: Send + Sync {
    /// Whether attempts for `login` are currently blocked
    async fn is_locked(&self, login: &str, context: &AuthContext) -> bool;

    /// Count a denied attempt
    async fn record_failure(&self, login: &str, context: &AuthContext);

    /// Note a verified login
    async fn record_success(&self, _login: &str, _context: &AuthContext) {}
}

/// Lockout that never blocks
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLockout;

#[async_trait::async_trait]
impl LoginLockout for NoLockout {
    async fn is_locked(&self, _login: &str, _context: &AuthContext) -> bool {
        false
    }

    async fn record_failure(&self, _login: &str, _context: &AuthContext) {}
}

/// Sliding window of failure timestamps
#[derive(Debug, Clone)]
struct SlidingWindow {
    failures: Vec<Instant>,
    window: Duration,
}

impl SlidingWindow {
    fn new(window: Duration) -> Self {
        Self {
            failures: Vec::new(),
            window,
        }
    }

    fn add(&mut self) {
        self.cleanup();
        self.failures.push(Instant::now());
    }

    /// Remove expired failures
    fn cleanup(&mut self) {
        let window = self.window;
        self.failures.retain(|t| t.elapsed() < window);
    }

    fn count(&mut self) -> usize {
        self.cleanup();
        self.failures.len()
    }
}

/// Key for failure tracking
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
enum LockoutKey {
    Ip(IpAddr),
    Login(String),
}

/// In-memory failed-login counter
///
/// A login is locked once it, or the remote address it comes from, has
/// `max_failures` failures inside `window`. A successful login clears the
/// failures of that login (not of its address). Expired entries are purged
/// at most once per window while failures are being recorded.
#[derive(Clone)]
pub struct FailedLoginTracker {
    failures: Arc<RwLock<HashMap<LockoutKey, SlidingWindow>>>,
    max_failures: usize,
    window: Duration,
    last_purge: Arc<RwLock<Instant>>,
}

impl FailedLoginTracker {
    pub fn new(max_failures: usize, window: Duration) -> Self {
        Self {
            failures: Arc::new(RwLock::new(HashMap::new())),
            max_failures,
            window,
            last_purge: Arc::new(RwLock::new(Instant::now())),
        }
    }

    fn keys(login: &str, context: &AuthContext) -> Vec<LockoutKey> {
        let mut keys = vec![LockoutKey::Login(login.to_lowercase())];
        if let Some(ip) = context.remote_addr {
            keys.push(LockoutKey::Ip(ip));
        }
        keys
    }

    #[cfg(test)]
    pub(crate) async fn failure_count(&self, login: &str) -> usize {
        let key = LockoutKey::Login(login.to_lowercase());
        let mut failures = self.failures.write().await;

        failures.get_mut(&key).map(SlidingWindow::count).unwrap_or(0)
    }

    /// Forget the failures of a login, e.g. after an administrator unlock
    pub async fn reset(&self, login: &str) {
        let key = LockoutKey::Login(login.to_lowercase());
        self.failures.write().await.remove(&key);
        debug!("Reset failed logins for {}", login);
    }

    /// Drop entries whose failures have all expired
    pub async fn purge_expired(&self) {
        let mut failures = self.failures.write().await;
        let before = failures.len();
        failures.retain(|_, window| window.count() > 0);
        debug!("Purged {} expired lockout entries", before - failures.len());
    }

    async fn maybe_purge(&self) {
        let mut last_purge = self.last_purge.write().await;
        if last_purge.elapsed() < self.window {
            return;
        }
        *last_purge = Instant::now();
        drop(last_purge);

        self.purge_expired().await;
    }
}

#[async_trait::async_trait]
impl LoginLockout for FailedLoginTracker {
    async fn is_locked(&self, login: &str, context: &AuthContext) -> bool {
        let mut failures = self.failures.write().await;

        for key in Self::keys(login, context) {
            let Some(window) = failures.get_mut(&key) else {
                continue;
            };

            let count = window.count();
            if count == 0 {
                failures.remove(&key);
            } else if count >= self.max_failures {
                warn!("Login locked for {:?}: {} failures", key, count);
                return true;
            }
        }

        false
    }

    async fn record_failure(&self, login: &str, context: &AuthContext) {
        let mut failures = self.failures.write().await;

        for key in Self::keys(login, context) {
            failures
                .entry(key)
                .or_insert_with(|| SlidingWindow::new(self.window))
                .add();
        }
        drop(failures);
        debug!("Recorded failed login for {}", login);

        self.maybe_purge().await;
    }

    async fn record_success(&self, login: &str, _context: &AuthContext) {
        self.reset(login).await;
    }
}
