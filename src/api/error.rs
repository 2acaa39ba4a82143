//! Error classification for catalog and token-endpoint calls
//!
//! Every transport failure, non-2xx status and unreadable payload is mapped
//! into [`ClassifiedError`] before it leaves the `api` or `auth` layers.
//! Cancellation is not part of this taxonomy: a dropped future or a fired
//! cancellation token never reaches these functions.

use std::error::Error as StdError;
use std::io;

use thiserror::Error;

/// Status-code bucket of an HTTP rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorKind {
    /// 400
    BadRequest,
    /// 401 and 403
    Unauthorized,
    /// 404
    NotFound,
    /// 408
    RequestTimeout,
    /// 500..=599
    Server,
    /// Any other non-2xx status
    Other,
}

impl HttpErrorKind {
    pub fn from_status(code: u16) -> Self {
        match code {
            400 => Self::BadRequest,
            401 | 403 => Self::Unauthorized,
            404 => Self::NotFound,
            408 => Self::RequestTimeout,
            500..=599 => Self::Server,
            _ => Self::Other,
        }
    }
}

/// Closed error taxonomy shared by the credential and pagination layers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifiedError {
    #[error("no network connectivity: {0}")]
    NoConnectivity(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        kind: HttpErrorKind,
        message: String,
    },

    #[error("response body was empty or could not be parsed")]
    EmptyBody,

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl ClassifiedError {
    /// HTTP status code, when the remote end answered at all.
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the remote end rejected the presented credential.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Self::Http {
                kind: HttpErrorKind::Unauthorized,
                ..
            }
        )
    }

    /// Transport failures and 408/5xx are worth a scoped retry; other
    /// rejections will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NoConnectivity(_) | Self::Timeout(_) | Self::Io(_) | Self::EmptyBody => true,
            Self::Http { kind, .. } => {
                matches!(kind, HttpErrorKind::RequestTimeout | HttpErrorKind::Server)
            }
            Self::Unexpected(_) => false,
        }
    }
}

/// Classify a non-2xx response by status code.
///
/// `raw_message` is the response body (or whatever text the caller has); a
/// blank message falls back to the canonical reason phrase.
pub fn from_http_status(code: u16, raw_message: &str) -> ClassifiedError {
    let message = if raw_message.trim().is_empty() {
        reqwest::StatusCode::from_u16(code)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("unknown status")
            .to_string()
    } else {
        raw_message.trim().to_string()
    };

    ClassifiedError::Http {
        status: code,
        kind: HttpErrorKind::from_status(code),
        message,
    }
}

/// Classify a reqwest transport error.
pub fn from_reqwest(err: &reqwest::Error) -> ClassifiedError {
    if let Some(status) = err.status() {
        return from_http_status(status.as_u16(), &err.to_string());
    }
    if err.is_timeout() {
        return ClassifiedError::Timeout(err.to_string());
    }
    if err.is_connect() {
        return ClassifiedError::NoConnectivity(err.to_string());
    }
    if err.is_decode() {
        return ClassifiedError::EmptyBody;
    }
    if err.is_body() || err.is_request() {
        // Timeouts and resets surface here wrapped in hyper/io errors.
        if let Some(classified) = from_source_chain(err) {
            return classified;
        }
        return ClassifiedError::Io(err.to_string());
    }
    ClassifiedError::Unexpected(err.to_string())
}

/// Classify an arbitrary error by walking its source chain.
pub fn from_error(err: &(dyn StdError + 'static)) -> ClassifiedError {
    if let Some(classified) = err.downcast_ref::<ClassifiedError>() {
        return classified.clone();
    }
    if let Some(reqwest_err) = err.downcast_ref::<reqwest::Error>() {
        return from_reqwest(reqwest_err);
    }
    from_source_chain(err).unwrap_or_else(|| ClassifiedError::Unexpected(err.to_string()))
}

fn from_source_chain(err: &(dyn StdError + 'static)) -> Option<ClassifiedError> {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return Some(from_io(io_err));
        }
        current = e.source();
    }
    None
}

fn from_io(err: &io::Error) -> ClassifiedError {
    match err.kind() {
        io::ErrorKind::TimedOut => ClassifiedError::Timeout(err.to_string()),
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::AddrNotAvailable => ClassifiedError::NoConnectivity(err.to_string()),
        _ => ClassifiedError::Io(err.to_string()),
    }
}
