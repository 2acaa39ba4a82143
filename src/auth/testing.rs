//! In-process fakes shared by unit tests

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::coordinator::CredentialCoordinator;
use super::oauth::{TokenExchange, TokenGrant};
use super::store::{CredentialStore, MemoryStore};
use super::tokens::Clock;
use crate::api::error::ClassifiedError;

pub const WINDOW: Duration = Duration::from_secs(1500);

/// Manually driven clock for deterministic expiry checks.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now_secs: u64) -> Self {
        Self {
            now: AtomicU64::new(now_secs),
        }
    }

    pub fn set(&self, now_secs: u64) {
        self.now.store(now_secs, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_secs(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Token endpoint double. Counts calls, tracks overlap, and can be told to
/// fail or stall.
#[derive(Debug, Default)]
pub struct FakeExchange {
    pub refresh_calls: AtomicUsize,
    pub code_calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    delay_ms: AtomicU64,
    failure: Mutex<Option<ClassifiedError>>,
    rotate: Mutex<bool>,
}

impl FakeExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    pub fn fail_with(&self, err: Option<ClassifiedError>) {
        *self.failure.lock().unwrap() = err;
    }

    pub fn rotate_refresh(&self, rotate: bool) {
        *self.rotate.lock().unwrap() = rotate;
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    async fn simulate(&self) -> Result<(), ClassifiedError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let failure = self.failure.lock().unwrap().clone();
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TokenExchange for FakeExchange {
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ClassifiedError> {
        self.code_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate().await?;
        Ok(TokenGrant {
            access_token: format!("access-for-{}", code),
            refresh_token: Some(format!("refresh-for-{}", code)),
            expires_in: Some(21600),
            scope: None,
            user_id: None,
        })
    }

    async fn exchange_refresh(&self, refresh_token: &str) -> Result<TokenGrant, ClassifiedError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.simulate().await?;
        let rotate = *self.rotate.lock().unwrap();
        Ok(TokenGrant {
            access_token: format!("access-{}", n),
            refresh_token: rotate.then(|| format!("{}-r{}", refresh_token, n)),
            expires_in: Some(21600),
            scope: None,
            user_id: None,
        })
    }
}

pub struct Fixture {
    pub clock: Arc<ManualClock>,
    pub kv: Arc<MemoryStore>,
    pub store: Arc<CredentialStore>,
    pub exchange: Arc<FakeExchange>,
    pub coordinator: Arc<CredentialCoordinator>,
}

pub async fn fixture(exchange: FakeExchange, refresh_timeout: Option<Duration>) -> Fixture {
    let clock = Arc::new(ManualClock::new(0));
    let kv = Arc::new(MemoryStore::new());
    let store = Arc::new(
        CredentialStore::open(kv.clone(), clock.clone(), WINDOW)
            .await
            .unwrap(),
    );
    let exchange = Arc::new(exchange);
    let coordinator = Arc::new(CredentialCoordinator::new(
        store.clone(),
        exchange.clone(),
        refresh_timeout,
    ));

    Fixture {
        clock,
        kv,
        store,
        exchange,
        coordinator,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(10);
        assert_eq!(clock.now_secs(), 10);
        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now_secs(), 15);
        clock.set(1);
        assert_eq!(clock.now_secs(), 1);
    }
}
