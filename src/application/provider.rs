//! Contract of the upstream hosting API the caches read through.

use std::fmt;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, stream::BoxStream};
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("upstream resource not found")]
    NotFound,
    #[error("upstream answered {status} for `{endpoint}`")]
    UnexpectedStatus { endpoint: String, status: u16 },
    #[error("upstream transport failure: {message}")]
    Transport { message: String },
    #[error("upstream payload could not be decoded: {message}")]
    Decode { message: String },
}

impl ProviderError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// 4xx outcomes: the requested repository or branch is not a site.
    pub fn is_client_error(&self) -> bool {
        match self {
            ProviderError::NotFound => true,
            ProviderError::UnexpectedStatus { status, .. } => (400..500).contains(status),
            ProviderError::Transport { .. } | ProviderError::Decode { .. } => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    pub name: String,
    pub commit_id: String,
    pub commit_date: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountKind {
    Organization,
    User,
}

/// An opened upstream file: declared metadata plus the body stream.
pub struct FileStream {
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub body: BoxStream<'static, Result<Bytes, ProviderError>>,
}

impl FileStream {
    pub fn from_bytes(body: Bytes, content_type: Option<String>) -> Self {
        Self {
            content_length: Some(body.len() as u64),
            content_type,
            body: futures::stream::once(async move { Ok(body) }).boxed(),
        }
    }

    /// Buffer the whole body.
    pub async fn into_bytes(mut self) -> Result<Bytes, ProviderError> {
        let mut buffer = BytesMut::with_capacity(
            self.content_length
                .and_then(|length| usize::try_from(length).ok())
                .unwrap_or_default(),
        );
        while let Some(chunk) = self.body.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer.freeze())
    }
}

impl fmt::Debug for FileStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStream")
            .field("content_length", &self.content_length)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Read access to a Git hosting service.
///
/// `open_file` must report both 403 and 404 as [`ProviderError::NotFound`].
#[async_trait]
pub trait ContentProvider: Send + Sync {
    async fn list_branches(&self, owner: &str, repo: &str) -> Result<Vec<Branch>, ProviderError>;

    async fn list_topics(&self, owner: &str, repo: &str) -> Result<Vec<String>, ProviderError>;

    /// Repository names owned by `owner`; `NotFound` when no such account of that kind exists.
    async fn list_repositories(
        &self,
        owner: &str,
        kind: AccountKind,
    ) -> Result<Vec<String>, ProviderError>;

    async fn open_file(
        &self,
        owner: &str,
        repo: &str,
        reference: &str,
        path: &str,
    ) -> Result<FileStream, ProviderError>;

    async fn file_exists(
        &self,
        owner: &str,
        repo: &str,
        reference: &str,
        path: &str,
    ) -> Result<bool, ProviderError> {
        match self.open_file(owner, repo, reference, path).await {
            Ok(_) => Ok(true),
            Err(ProviderError::NotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_classified() {
        assert!(ProviderError::NotFound.is_client_error());
        assert!(
            ProviderError::UnexpectedStatus {
                endpoint: "x".into(),
                status: 451
            }
            .is_client_error()
        );
        assert!(
            !ProviderError::UnexpectedStatus {
                endpoint: "x".into(),
                status: 503
            }
            .is_client_error()
        );
        assert!(!ProviderError::transport("timeout").is_client_error());
    }

    #[tokio::test]
    async fn buffered_stream_preserves_bytes() {
        let chunks = vec![Ok(Bytes::from_static(b"<h1>")), Ok(Bytes::from_static(b"hi</h1>"))];
        let file = FileStream {
            content_length: Some(11),
            content_type: None,
            body: futures::stream::iter(chunks).boxed(),
        };
        let body = file.into_bytes().await.expect("buffered");
        assert_eq!(&body[..], b"<h1>hi</h1>");
    }

    #[tokio::test]
    async fn stream_error_surfaces() {
        let chunks = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(ProviderError::transport("reset")),
        ];
        let file = FileStream {
            content_length: None,
            content_type: None,
            body: futures::stream::iter(chunks).boxed(),
        };
        assert!(file.into_bytes().await.is_err());
    }
}
