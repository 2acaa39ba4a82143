//! Bearer-credential injection for outgoing requests
//!
//! Two entry points over the same rule:
//!
//! - [`RequestAuthenticator::authenticate`] is async and is what
//!   [`CatalogClient`](super::client::CatalogClient) uses.
//! - [`RequestAuthenticator::authenticate_blocking`] is for transports whose
//!   request hook is synchronous. It parks the calling thread until the
//!   coordinator answers, which may include a whole refresh round-trip. Every
//!   thread parked here is one the transport's pool cannot use for other
//!   requests, so a slow token endpoint under heavy concurrency can exhaust
//!   that pool.

use std::sync::Arc;

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::Request;
use tokio::runtime::Handle;

use crate::auth::{AuthError, CredentialCoordinator};

#[derive(Debug, Clone)]
pub struct RequestAuthenticator {
    coordinator: Arc<CredentialCoordinator>,
}

impl RequestAuthenticator {
    pub fn new(coordinator: Arc<CredentialCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Attach `Authorization: Bearer <access>` unless the request already
    /// carries an `Authorization` header. Without a stored credential the
    /// request goes out unchanged.
    pub async fn authenticate(&self, mut request: Request) -> Result<Request, AuthError> {
        if request.headers().contains_key(AUTHORIZATION) {
            return Ok(request);
        }

        match self.coordinator.valid_access_token().await? {
            Some(token) if !token.trim().is_empty() => {
                let mut value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                    .map_err(|_| AuthError::InvalidHeader)?;
                value.set_sensitive(true);
                request.headers_mut().insert(AUTHORIZATION, value);
            }
            _ => {
                tracing::debug!("No credential; sending {} unauthenticated", request.url());
            }
        }

        Ok(request)
    }

    /// Blocking form of [`authenticate`](Self::authenticate).
    ///
    /// Must run on a thread that is not driving `runtime` (for example a
    /// transport worker or `spawn_blocking`); calling it from inside an async
    /// task panics.
    pub fn authenticate_blocking(
        &self,
        runtime: &Handle,
        request: Request,
    ) -> Result<Request, AuthError> {
        runtime.block_on(self.authenticate(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::ClassifiedError;
    use crate::auth::testing::{fixture, FakeExchange};

    fn request() -> Request {
        reqwest::Client::new()
            .get("http://catalog.test/search?q=x")
            .build()
            .unwrap()
    }

    fn auth_header(request: &Request) -> Option<&str> {
        request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
    }

    #[tokio::test]
    async fn test_attaches_bearer() {
        let fx = fixture(FakeExchange::new(), None).await;
        fx.store.save("access-x", "refresh-x").await.unwrap();
        let auth = RequestAuthenticator::new(fx.coordinator.clone());

        let request = auth.authenticate(request()).await.unwrap();
        assert_eq!(auth_header(&request), Some("Bearer access-x"));
        assert!(request.headers()[AUTHORIZATION].is_sensitive());
    }

    #[tokio::test]
    async fn test_keeps_caller_supplied_authorization() {
        let fx = fixture(FakeExchange::new(), None).await;
        fx.store.save("access-x", "refresh-x").await.unwrap();
        fx.clock.set(10_000);
        let auth = RequestAuthenticator::new(fx.coordinator.clone());

        let mut req = request();
        req.headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));

        let request = auth.authenticate(req).await.unwrap();
        assert_eq!(auth_header(&request), Some("Basic abc"));
        // The coordinator was never consulted.
        assert_eq!(fx.exchange.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_unauthenticated_passes_through() {
        let fx = fixture(FakeExchange::new(), None).await;
        let auth = RequestAuthenticator::new(fx.coordinator.clone());

        let request = auth.authenticate(request()).await.unwrap();
        assert!(auth_header(&request).is_none());
    }

    #[tokio::test]
    async fn test_refresh_failure_propagates() {
        let fx = fixture(FakeExchange::new(), None).await;
        fx.store.save("stale", "refresh-x").await.unwrap();
        fx.clock.set(10_000);
        fx.exchange
            .fail_with(Some(ClassifiedError::Timeout("slow".to_string())));
        let auth = RequestAuthenticator::new(fx.coordinator.clone());

        let err = auth.authenticate(request()).await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshFailed(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_bridge_refreshes_from_worker_thread() {
        let fx = fixture(FakeExchange::new(), None).await;
        fx.store.save("stale", "refresh-x").await.unwrap();
        fx.clock.set(10_000);
        let auth = RequestAuthenticator::new(fx.coordinator.clone());
        let runtime = Handle::current();

        let request = tokio::task::spawn_blocking(move || {
            auth.authenticate_blocking(&runtime, request())
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(auth_header(&request), Some("Bearer access-1"));
        assert_eq!(fx.exchange.refresh_calls(), 1);
    }
}
