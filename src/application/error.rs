use std::{any::Any, error::Error as StdError};

use axum::{http::StatusCode, response::Response};
use thiserror::Error;
use tokio::task::JoinError;
use tracing::error;

use crate::{
    application::provider::ProviderError, cache::AliasError, config::LoadError,
    infra::error::InfraError,
};

/// Diagnostic chain attached to a response so the request logger can print it.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// How the HTTP layer must react to a failed `route`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Not ours; hand the request to the next handler.
    NotMatched,
    /// Render the 40x page.
    NotFound,
    /// Render the 50x page.
    Internal,
}

#[derive(Debug, Error)]
pub enum PagesError {
    #[error("request is outside the pages domain")]
    NotMatched,
    #[error("not found: {message}")]
    NotFound { message: String },
    #[error("upstream request failed")]
    Upstream(#[source] ProviderError),
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl PagesError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PagesError::NotMatched => ErrorKind::NotMatched,
            PagesError::NotFound { .. } => ErrorKind::NotFound,
            PagesError::Upstream(_) | PagesError::Internal { .. } => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::NotMatched | ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convert a failed background refresh into an internal error.
    pub(crate) fn from_join(source: &'static str, err: JoinError) -> Self {
        if err.is_panic() {
            let message = panic_message(&*err.into_panic());
            error!(source, panic = %message, "Background refresh panicked");
            Self::internal(format!("refresh panicked: {message}"))
        } else {
            Self::internal(format!("refresh task was cancelled: {err}"))
        }
    }
}

impl From<ProviderError> for PagesError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::NotFound => Self::not_found("upstream resource not found"),
            other => Self::Upstream(other),
        }
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Start-up and command failures of the binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to load configuration")]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("alias registry unavailable")]
    Alias(#[from] AliasError),
    #[error("upstream check failed")]
    Upstream(#[from] ProviderError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
