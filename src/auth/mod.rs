//! Authentication for the catalog API
//!
//! Implements the OAuth2 authorization-code grant with refresh tokens, a
//! persisted credential record, and a single-flight refresh coordinator.

pub mod coordinator;
pub mod oauth;
pub mod store;
pub mod tokens;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};

pub use coordinator::{AuthError, CredentialCoordinator};
pub use oauth::{login, logout, status, OAuthExchangeClient, TokenExchange, TokenGrant};
pub use store::{CredentialStore, FileStore, KeyValueStore, MemoryStore, StoreError};
pub use tokens::{Clock, Credential, SystemClock};

use crate::config::Config;

/// OAuth2 client registration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// OAuth2 client ID
    pub client_id: String,
    /// OAuth2 client secret (sent in the form body)
    pub client_secret: String,
    /// Authorization endpoint the user is sent to
    pub auth_url: String,
    /// Token endpoint for code and refresh exchanges
    pub token_url: String,
    /// Registered redirect URI
    pub redirect_uri: String,
}

impl From<&Config> for AuthConfig {
    fn from(config: &Config) -> Self {
        Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            auth_url: config.auth_url.clone(),
            token_url: config.token_url.clone(),
            redirect_uri: config.redirect_uri.clone(),
        }
    }
}

/// Everything one authenticated session needs, wired once and shared.
pub struct Session {
    pub store: Arc<CredentialStore>,
    pub coordinator: Arc<CredentialCoordinator>,
    pub exchange: Arc<OAuthExchangeClient>,
}

impl Session {
    /// Open the on-disk session described by `config`.
    pub async fn open(config: &Config) -> Result<Self> {
        let kv = Arc::new(FileStore::new(Config::credentials_path()?));
        let store = Arc::new(
            CredentialStore::open(kv, Arc::new(SystemClock), config.refresh_window())
                .await
                .context("Failed to open credential store")?,
        );
        let exchange = Arc::new(OAuthExchangeClient::new(&AuthConfig::from(config))?);
        let coordinator = Arc::new(CredentialCoordinator::new(
            store.clone(),
            exchange.clone(),
            config.refresh_timeout(),
        ));

        Ok(Self {
            store,
            coordinator,
            exchange,
        })
    }
}
