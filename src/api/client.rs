//! Authenticated HTTP client for the catalog API
//!
//! Wraps reqwest::Client with bearer injection and status classification.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use url::Url;

use super::authenticator::RequestAuthenticator;
use super::error::{self, ClassifiedError};
use crate::auth::AuthError;

pub struct CatalogClient {
    http: reqwest::Client,
    base_url: Url,
    site_id: String,
    authenticator: RequestAuthenticator,
}

impl CatalogClient {
    pub fn new(api_base: &str, site_id: &str, authenticator: RequestAuthenticator) -> Result<Self> {
        Self::with_http(reqwest::Client::new(), api_base, site_id, authenticator)
    }

    pub fn with_http(
        http: reqwest::Client,
        api_base: &str,
        site_id: &str,
        authenticator: RequestAuthenticator,
    ) -> Result<Self> {
        // Trailing slash so `join` appends instead of replacing the last segment.
        let base = format!("{}/", api_base.trim_end_matches('/'));
        let base_url = Url::parse(&base).with_context(|| format!("Invalid api_base {}", api_base))?;

        Ok(Self {
            http,
            base_url,
            site_id: site_id.to_string(),
            authenticator,
        })
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClassifiedError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ClassifiedError::Unexpected(format!("bad path {}: {}", path, e)))
    }

    /// `collection/<id>` with `id` kept as a single escaped segment, so it can
    /// never climb out of `collection` or smuggle in a query.
    fn resource(&self, collection: &str, id: &str) -> Result<Url, ClassifiedError> {
        if matches!(id.trim(), "" | "." | "..") {
            return Err(ClassifiedError::Unexpected(format!("invalid id {:?}", id)));
        }
        let mut url = self.endpoint(collection)?;
        url.path_segments_mut()
            .map_err(|_| ClassifiedError::Unexpected(format!("bad base url {}", self.base_url)))?
            .pop_if_empty()
            .push(id);
        Ok(url)
    }

    /// GET `path` with `query`, authenticated when a credential exists.
    pub async fn get(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, ClassifiedError> {
        let url = self.endpoint(path)?;
        self.send(url, query).await
    }

    /// GET and decode one resource of `collection` by id.
    pub async fn get_resource<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<T, ClassifiedError> {
        let url = self.resource(collection, id)?;
        let resp = self.send(url, &[]).await?;
        read_json(resp).await
    }

    async fn send(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, ClassifiedError> {
        let request = self
            .http
            .get(url)
            .query(query)
            .build()
            .map_err(|e| error::from_reqwest(&e))?;
        let request = self.authenticator.authenticate(request).await.map_err(|e| {
            tracing::warn!("Could not authenticate request: {}", e);
            ClassifiedError::from(e)
        })?;

        tracing::debug!("GET {}", request.url());
        let resp = self
            .http
            .execute(request)
            .await
            .map_err(|e| error::from_reqwest(&e))?;

        check_response(resp).await
    }

    /// GET and decode a JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ClassifiedError> {
        let resp = self.get(path, query).await?;
        read_json(resp).await
    }
}

/// A refresh that failed while preparing a data call surfaces as the
/// underlying transport or HTTP condition.
impl From<AuthError> for ClassifiedError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::RefreshFailed(e) | AuthError::SignInFailed(e) => e,
            AuthError::Storage(e) => ClassifiedError::Io(e.to_string()),
            AuthError::InvalidHeader => {
                ClassifiedError::Unexpected("access value is not a valid header".to_string())
            }
        }
    }
}

/// Classify non-2xx responses.
async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, ClassifiedError> {
    let status = resp.status();
    if !status.is_success() {
        tracing::debug!("HTTP {} from {}", status.as_u16(), resp.url());
        let body = resp.text().await.unwrap_or_default();
        return Err(error::from_http_status(status.as_u16(), &body));
    }
    Ok(resp)
}

/// Decode a 2xx body; a missing or malformed payload is `EmptyBody`.
async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClassifiedError> {
    let bytes = resp.bytes().await.map_err(|e| error::from_reqwest(&e))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(ClassifiedError::EmptyBody);
    }
    serde_json::from_slice(&bytes).map_err(|e| {
        tracing::debug!("Unparsable response body: {}", e);
        ClassifiedError::EmptyBody
    })
}
