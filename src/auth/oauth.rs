//! OAuth2 authorization-code and refresh-token exchanges, plus the
//! login/logout/status flows built on them

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use oauth2::basic::{
    BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
    BasicTokenType,
};
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, Client, ClientId, ClientSecret, CsrfToken,
    ExtraTokenFields, HttpRequest, HttpResponse, RedirectUrl, RefreshToken, RequestTokenError,
    StandardRevocableToken, StandardTokenResponse, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use url::Url;

use super::{AuthConfig, Session};
use crate::api::error::{self, ClassifiedError};

/// Provider-specific fields returned next to the standard token response.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CatalogTokenFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<serde_json::Value>,
}

impl ExtraTokenFields for CatalogTokenFields {}

type CatalogTokenResponse = StandardTokenResponse<CatalogTokenFields, BasicTokenType>;

type CatalogOAuthClient = Client<
    BasicErrorResponse,
    CatalogTokenResponse,
    BasicTokenType,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
>;

/// Result of a successful exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    /// `None` when the provider did not rotate the refresh value.
    pub refresh_token: Option<String>,
    /// Provider-advertised lifetime. Informational only.
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
    pub user_id: Option<String>,
}

/// The two network calls that produce credentials.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// `grant_type=authorization_code`. A response without a refresh value
    /// is rejected.
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ClassifiedError>;

    /// `grant_type=refresh_token`.
    async fn exchange_refresh(&self, refresh_token: &str) -> Result<TokenGrant, ClassifiedError>;
}

/// Token endpoint client. Client credentials travel in the form body.
pub struct OAuthExchangeClient {
    oauth: CatalogOAuthClient,
    http: reqwest::Client,
}

impl OAuthExchangeClient {
    pub fn new(auth_config: &AuthConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to build token HTTP client")?;
        Self::with_http(auth_config, http)
    }

    pub fn with_http(auth_config: &AuthConfig, http: reqwest::Client) -> Result<Self> {
        let auth_url = AuthUrl::new(auth_config.auth_url.clone()).context("Invalid auth_url")?;
        let token_url =
            TokenUrl::new(auth_config.token_url.clone()).context("Invalid token_url")?;
        let redirect_url =
            RedirectUrl::new(auth_config.redirect_uri.clone()).context("Invalid redirect_uri")?;

        let oauth = CatalogOAuthClient::new(
            ClientId::new(auth_config.client_id.clone()),
            Some(ClientSecret::new(auth_config.client_secret.clone())),
            auth_url,
            Some(token_url),
        )
        .set_auth_type(AuthType::RequestBody)
        .set_redirect_uri(redirect_url);

        Ok(Self { oauth, http })
    }

    /// Authorization URL to send the user to, and the CSRF state it carries.
    pub fn authorize_url(&self) -> (Url, CsrfToken) {
        self.oauth.authorize_url(CsrfToken::new_random).url()
    }
}

#[async_trait]
impl TokenExchange for OAuthExchangeClient {
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ClassifiedError> {
        tracing::info!("Exchanging authorization code");
        let response = self
            .oauth
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(|request| send_token_request(&self.http, request))
            .await
            .map_err(classify_token_error)?;

        let grant = grant_from(&response);
        if grant.refresh_token.is_none() {
            return Err(ClassifiedError::Unexpected(
                "token endpoint returned no refresh_token".to_string(),
            ));
        }
        Ok(grant)
    }

    async fn exchange_refresh(&self, refresh_token: &str) -> Result<TokenGrant, ClassifiedError> {
        let response = self
            .oauth
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(|request| send_token_request(&self.http, request))
            .await
            .map_err(classify_token_error)?;

        Ok(grant_from(&response))
    }
}

/// Transport for the oauth2 crate. Non-2xx answers are classified here so
/// the status code survives.
async fn send_token_request(
    http: &reqwest::Client,
    request: HttpRequest,
) -> Result<HttpResponse, ClassifiedError> {
    let mut builder = http
        .request(request.method, request.url.as_str())
        .body(request.body);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_bytes());
    }

    tracing::debug!("Token POST {}", request.url);
    let response = builder.send().await.map_err(|e| error::from_reqwest(&e))?;
    let status_code = response.status();
    let headers = response.headers().to_owned();
    let body = response.bytes().await.map_err(|e| error::from_reqwest(&e))?;

    if !status_code.is_success() {
        return Err(error::from_http_status(
            status_code.as_u16(),
            &String::from_utf8_lossy(&body),
        ));
    }

    // oauth2 only parses a body that arrives with exactly 200.
    Ok(HttpResponse {
        status_code: reqwest::StatusCode::OK,
        headers,
        body: body.to_vec(),
    })
}

fn classify_token_error(
    err: RequestTokenError<ClassifiedError, BasicErrorResponse>,
) -> ClassifiedError {
    match err {
        RequestTokenError::Request(e) => e,
        RequestTokenError::ServerResponse(e) => ClassifiedError::Unexpected(e.to_string()),
        RequestTokenError::Parse(e, _) => {
            tracing::debug!("Unparsable token response: {}", e);
            ClassifiedError::EmptyBody
        }
        RequestTokenError::Other(msg) => {
            tracing::debug!("Unusable token response: {}", msg);
            ClassifiedError::EmptyBody
        }
    }
}

fn grant_from(response: &CatalogTokenResponse) -> TokenGrant {
    TokenGrant {
        access_token: response.access_token().secret().to_string(),
        refresh_token: response
            .refresh_token()
            .map(|t| t.secret().to_string())
            .filter(|t| !t.trim().is_empty()),
        expires_in: response.expires_in().map(|d| d.as_secs()),
        scope: response.scopes().map(|scopes| {
            scopes
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        }),
        user_id: response
            .extra_fields()
            .user_id
            .as_ref()
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
    }
}

/// Pull the authorization code out of whatever the user pasted: either the
/// bare code or the full redirect URL. When the URL carries a `state`, it
/// must match the one we issued.
pub fn extract_code(input: &str, expected_state: &str) -> Result<String> {
    let input = input.trim();
    if input.is_empty() {
        bail!("No authorization code given");
    }

    let Ok(url) = Url::parse(input) else {
        return Ok(input.to_string());
    };

    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => bail!("Authorization was denied: {}", value),
            _ => {}
        }
    }

    if let Some(state) = state {
        if state != expected_state {
            bail!("State mismatch in redirect URL; refusing to continue");
        }
    }
    code.context("Redirect URL has no `code` parameter")
}

/// Perform the authorization-code login
pub async fn login(session: &Session, code: Option<String>, force: bool) -> Result<()> {
    if !force && session.store.is_authenticated() {
        match session.coordinator.valid_access_token().await {
            Ok(Some(_)) => {
                println!("Already logged in. Use --force to re-authenticate.");
                return Ok(());
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Stored credential unusable, starting a new login: {}", e);
            }
        }
    }

    let (auth_url, state) = session.exchange.authorize_url();

    let input = match code {
        Some(code) => code,
        None => {
            println!();
            println!("To sign in, visit: {}", auth_url);
            println!("Then paste the redirect URL (or just its `code` value):");
            let mut line = String::new();
            BufReader::new(tokio::io::stdin())
                .read_line(&mut line)
                .await
                .context("Failed to read authorization code")?;
            line
        }
    };

    let code = extract_code(&input, state.secret())?;
    session
        .coordinator
        .sign_in(&code)
        .await
        .context("Login failed")?;

    println!("Login successful.");
    Ok(())
}

/// Clear stored credentials
pub async fn logout(session: &Session) -> Result<()> {
    session.coordinator.sign_out().await?;
    println!("Logged out.");
    Ok(())
}

/// Display current auth status
pub async fn status(session: &Session) -> Result<()> {
    let Some(credential) = session.store.credential().await? else {
        println!("Credential:  none");
        println!("\nRun 'catalog-cli login' to authenticate.");
        return Ok(());
    };

    let expires = chrono::DateTime::from_timestamp(credential.expires_at as i64, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| credential.expires_at.to_string());

    println!("Credential:  present");
    println!("  expires_at: {}", expires);
    if credential.must_refresh(session.store.now_secs()) {
        println!("  state:      expired (refreshes on next request)");
    } else {
        println!("  state:      valid");
    }
    Ok(())
}
