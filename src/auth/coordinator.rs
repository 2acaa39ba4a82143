//! Single-flight access-token refresh
//!
//! [`CredentialCoordinator`] hands out a usable access value. The common
//! case (credential still inside its window) is a plain store read. When the
//! credential has expired, callers queue on one async mutex; the first one
//! through performs the refresh and the rest find a fresh credential on the
//! post-acquire re-check.
//!
//! The coordinator never caches credential values between calls. Every
//! decision is made against what the [`CredentialStore`] holds right now.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;

use super::oauth::{TokenExchange, TokenGrant};
use super::store::{CredentialStore, StoreError};
use crate::api::error::ClassifiedError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("token refresh failed: {0}")]
    RefreshFailed(#[source] ClassifiedError),

    #[error("sign-in failed: {0}")]
    SignInFailed(#[source] ClassifiedError),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("access value cannot be sent as an HTTP header")]
    InvalidHeader,
}

/// One per authenticated session. Share it behind an `Arc`.
pub struct CredentialCoordinator {
    store: Arc<CredentialStore>,
    exchange: Arc<dyn TokenExchange>,
    refresh_lock: Mutex<()>,
    /// Upper bound on the refresh critical section; `None` waits as long as
    /// the network call takes.
    refresh_timeout: Option<Duration>,
}

impl CredentialCoordinator {
    pub fn new(
        store: Arc<CredentialStore>,
        exchange: Arc<dyn TokenExchange>,
        refresh_timeout: Option<Duration>,
    ) -> Self {
        Self {
            store,
            exchange,
            refresh_lock: Mutex::new(()),
            refresh_timeout,
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// A usable access value, refreshing it first if its window has passed.
    ///
    /// `Ok(None)` means "not authenticated": no refresh value is stored and
    /// no network call was made. Errors mean a refresh was attempted and
    /// failed (or the store could not be read); nothing is cached on failure,
    /// so the next caller tries again.
    pub async fn valid_access_token(&self) -> Result<Option<String>, AuthError> {
        if self.stored_refresh_token().await?.is_none() {
            tracing::debug!("No refresh credential stored; not authenticated");
            return Ok(None);
        }

        if !self.store.should_refresh().await {
            if let Some(access) = self.stored_access_token().await? {
                return Ok(Some(access));
            }
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited for the lock.
        if !self.store.should_refresh().await {
            if let Some(access) = self.stored_access_token().await? {
                tracing::debug!("Credential refreshed by a concurrent caller");
                return Ok(Some(access));
            }
        }

        // Re-read under the lock: a concurrent refresh may have rotated it,
        // or a sign-out may have removed it.
        let Some(refresh_token) = self.stored_refresh_token().await? else {
            return Ok(None);
        };

        tracing::info!("Access credential expired, refreshing...");
        let grant = self
            .bounded(self.exchange.exchange_refresh(&refresh_token))
            .await
            .map_err(|e| {
                tracing::warn!("Token refresh failed: {}", e);
                AuthError::RefreshFailed(e)
            })?;

        // Providers that do not rotate omit the refresh value; keep ours.
        let next_refresh = grant.refresh_token.as_deref().unwrap_or(&refresh_token);
        self.store.save(&grant.access_token, next_refresh).await?;

        tracing::info!("Token refresh complete");
        Ok(Some(grant.access_token))
    }

    /// Exchange an authorization code and persist the resulting credential.
    pub async fn sign_in(&self, code: &str) -> Result<(), AuthError> {
        let _guard = self.refresh_lock.lock().await;

        let grant = self
            .bounded(self.exchange.exchange_code(code))
            .await
            .map_err(AuthError::SignInFailed)?;
        let refresh_token = grant.refresh_token.clone().ok_or_else(|| {
            AuthError::SignInFailed(ClassifiedError::Unexpected(
                "token endpoint returned no refresh_token".to_string(),
            ))
        })?;

        self.store.save(&grant.access_token, &refresh_token).await?;
        log_grant(&grant);
        Ok(())
    }

    /// Forget the stored credential.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let _guard = self.refresh_lock.lock().await;
        self.store.clear().await?;
        tracing::info!("Credential cleared");
        Ok(())
    }

    async fn bounded<F>(&self, call: F) -> Result<TokenGrant, ClassifiedError>
    where
        F: std::future::Future<Output = Result<TokenGrant, ClassifiedError>>,
    {
        match self.refresh_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                ClassifiedError::Timeout(format!("token endpoint did not answer within {:?}", limit))
            })?,
            None => call.await,
        }
    }

    async fn stored_refresh_token(&self) -> Result<Option<String>, AuthError> {
        Ok(self
            .store
            .refresh_token()
            .await?
            .filter(|t| !t.trim().is_empty()))
    }

    async fn stored_access_token(&self) -> Result<Option<String>, AuthError> {
        Ok(self
            .store
            .access_token()
            .await?
            .filter(|t| !t.trim().is_empty()))
    }
}

fn log_grant(grant: &TokenGrant) {
    match &grant.user_id {
        Some(user_id) => tracing::info!("Signed in as user {}", user_id),
        None => tracing::info!("Signed in"),
    }
}

impl std::fmt::Debug for CredentialCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCoordinator")
            .field("store", &self.store)
            .field("refresh_timeout", &self.refresh_timeout)
            .finish()
    }
}
