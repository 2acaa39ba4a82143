//! Result type for single-shot operations

use std::future::Future;

use futures::stream::{self, Stream, StreamExt};

use crate::api::error::ClassifiedError;

/// Outcome of a one-off request, as seen by a UI.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Success(T),
    Error {
        message: String,
        code: Option<u16>,
        cause: Option<ClassifiedError>,
    },
    Loading,
}

impl<T> Outcome<T> {
    /// `Loading`, followed by whatever `request` resolves to.
    pub fn observe<F>(request: F) -> impl Stream<Item = Outcome<T>>
    where
        F: Future<Output = Outcome<T>>,
    {
        stream::once(async { Outcome::Loading }).chain(stream::once(request))
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    pub fn success(self) -> Option<T> {
        match self {
            Self::Success(value) => Some(value),
            Self::Error { .. } | Self::Loading => None,
        }
    }
}

impl<T> From<ClassifiedError> for Outcome<T> {
    fn from(err: ClassifiedError) -> Self {
        Self::Error {
            message: err.to_string(),
            code: err.code(),
            cause: Some(err),
        }
    }
}

impl<T> From<Result<T, ClassifiedError>> for Outcome<T> {
    fn from(result: Result<T, ClassifiedError>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(err) => err.into(),
        }
    }
}
