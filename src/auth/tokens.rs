//! Credential record and expiry math

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Fixed lifetime granted to every issued access value.
///
/// This is deliberately shorter than what the provider advertises in
/// `expires_in`, which is ignored.
pub const DEFAULT_REFRESH_WINDOW: Duration = Duration::from_secs(25 * 60);

/// Source of "now" in epoch seconds.
pub trait Clock: Send + Sync {
    fn now_secs(&self) -> u64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Access + refresh pair with the instant the access value stops being used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    /// Epoch seconds.
    pub expires_at: u64,
}

impl Credential {
    /// Build a credential issued at `issued_at`, valid for `window`.
    pub fn issue(
        access_token: String,
        refresh_token: String,
        issued_at: u64,
        window: Duration,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at: expiry_from(issued_at, window),
        }
    }

    pub fn must_refresh(&self, now: u64) -> bool {
        must_refresh(self.expires_at, now)
    }
}

pub fn expiry_from(issued_at: u64, window: Duration) -> u64 {
    issued_at.saturating_add(window.as_secs())
}

/// `true` once `now` reaches the stored expiry instant.
pub fn must_refresh(expires_at: u64, now: u64) -> bool {
    now >= expires_at
}
