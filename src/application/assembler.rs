//! Builds the response for one path of a resolved site.

use std::sync::Arc;

use axum::http::{
    HeaderMap, HeaderName, HeaderValue, StatusCode,
    header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG, LAST_MODIFIED, LOCATION},
};
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, stream::BoxStream};
use metrics::counter;
use time::{OffsetDateTime, UtcOffset, macros::format_description};
use tracing::debug;

use crate::{
    application::{
        error::PagesError,
        provider::{ContentProvider, FileStream, ProviderError},
    },
    cache::{FileLookup, RepositoryMetadata, SiteEntry, entity_tag},
};

pub const CACHE_MODE_HEADER: &str = "pages-server-cache";
pub const REVISION_HEADER: &str = "pages-server-hash";
pub const AGE_HEADER: &str = "pages-server-age";
pub const ENTRIES_HEADER: &str = "pages-server-entries";

const DEFAULT_INDEX: &str = "index.html";
const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Hit,
    Miss,
    /// Too large to cache; streamed from upstream.
    Skip,
}

impl CacheMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheMode::Hit => "HIT",
            CacheMode::Miss => "MISS",
            CacheMode::Skip => "SKIP",
        }
    }
}

pub enum PageBody {
    Empty,
    Full(Bytes),
    Stream(BoxStream<'static, Result<Bytes, ProviderError>>),
}

pub struct PageResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: PageBody,
    pub cache_mode: Option<CacheMode>,
}

impl PageResponse {
    pub fn redirect(status: StatusCode, location: &str) -> Result<Self, PagesError> {
        let location = HeaderValue::from_str(location)
            .map_err(|err| PagesError::internal(format!("invalid redirect target: {err}")))?;
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, location);
        Ok(Self {
            status,
            headers,
            body: PageBody::Empty,
            cache_mode: None,
        })
    }

    pub fn etag(&self) -> Option<&str> {
        self.headers.get(ETAG).and_then(|value| value.to_str().ok())
    }

    /// Buffer the body; used by tests and small internal callers.
    pub async fn into_bytes(self) -> Result<Bytes, ProviderError> {
        match self.body {
            PageBody::Empty => Ok(Bytes::new()),
            PageBody::Full(body) => Ok(body),
            PageBody::Stream(mut stream) => {
                let mut buffer = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buffer.extend_from_slice(&chunk?);
                }
                Ok(buffer.freeze())
            }
        }
    }
}

struct Served {
    status: StatusCode,
    /// Path whose extension decides the content type.
    content_path: String,
    content_type_hint: Option<String>,
    length: Option<u64>,
    body: PageBody,
    mode: CacheMode,
}

pub struct ResponseAssembler {
    provider: Arc<dyn ContentProvider>,
    max_file_size: u64,
    headers: HeaderMap,
}

impl ResponseAssembler {
    pub fn new(provider: Arc<dyn ContentProvider>, max_file_size: u64, headers: HeaderMap) -> Self {
        Self {
            provider,
            max_file_size,
            headers,
        }
    }

    pub async fn serve(
        &self,
        entry: &SiteEntry,
        metadata: &RepositoryMetadata,
        path: &str,
    ) -> Result<PageResponse, PagesError> {
        let path = normalize_request_path(path, metadata.index_name.as_deref())?;
        let etag = entity_tag(&metadata.revision, entry.key(), &path);

        let served = match entry.lookup_file(&path) {
            FileLookup::Present(body) => cached(StatusCode::OK, &path, body),
            FileLookup::Missing => self.fallback(entry, metadata).await?,
            FileLookup::Absent => match self.open(entry, metadata, &path).await {
                Ok(file) => self.deliver(entry, metadata, &path, file, StatusCode::OK).await?,
                Err(ProviderError::NotFound) => {
                    entry.mark_missing(&metadata.revision, &path);
                    self.fallback(entry, metadata).await?
                }
                Err(err) => return Err(PagesError::Upstream(err)),
            },
        };

        record_mode(served.mode);
        debug!(
            site = %entry.key(),
            path = %path,
            status = served.status.as_u16(),
            cache = served.mode.as_str(),
            "Serving file"
        );
        Ok(self.finish(served, entry, metadata, &etag))
    }

    /// Serve the configured fallback document for a missing path.
    async fn fallback(
        &self,
        entry: &SiteEntry,
        metadata: &RepositoryMetadata,
    ) -> Result<Served, PagesError> {
        let Some(name) = metadata.not_found_name.as_deref() else {
            return Err(PagesError::not_found("file not found and no fallback page"));
        };
        let status = if metadata.is_spa() {
            StatusCode::OK
        } else {
            StatusCode::NOT_FOUND
        };

        match entry.lookup_file(name) {
            FileLookup::Present(body) => Ok(cached(status, name, body)),
            FileLookup::Missing => Err(PagesError::not_found("fallback page is missing")),
            FileLookup::Absent => match self.open(entry, metadata, name).await {
                Ok(file) => self.deliver(entry, metadata, name, file, status).await,
                Err(ProviderError::NotFound) => {
                    entry.mark_missing(&metadata.revision, name);
                    Err(PagesError::not_found("fallback page is missing"))
                }
                Err(err) => Err(PagesError::Upstream(err)),
            },
        }
    }

    async fn open(
        &self,
        entry: &SiteEntry,
        metadata: &RepositoryMetadata,
        path: &str,
    ) -> Result<FileStream, ProviderError> {
        let key = entry.key();
        self.provider
            .open_file(
                &key.owner,
                &key.repo,
                &metadata.revision,
                &metadata.upstream_path(path),
            )
            .await
    }

    /// Buffer and cache a file within the size cap, stream it otherwise.
    async fn deliver(
        &self,
        entry: &SiteEntry,
        metadata: &RepositoryMetadata,
        path: &str,
        file: FileStream,
        status: StatusCode,
    ) -> Result<Served, PagesError> {
        let FileStream {
            content_length,
            content_type,
            mut body,
        } = file;

        if content_length.is_some_and(|length| length > self.max_file_size) {
            return Ok(Served {
                status,
                content_path: path.to_string(),
                content_type_hint: content_type,
                length: content_length,
                body: PageBody::Stream(body),
                mode: CacheMode::Skip,
            });
        }

        let mut buffer = BytesMut::with_capacity(
            content_length
                .and_then(|length| usize::try_from(length).ok())
                .unwrap_or_default(),
        );
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk.map_err(PagesError::Upstream)?);
            // Undeclared length grew past the cap: pass the rest through.
            if buffer.len() as u64 > self.max_file_size {
                let head = buffer.freeze();
                let stream = futures::stream::once(async move { Ok(head) })
                    .chain(body)
                    .boxed();
                return Ok(Served {
                    status,
                    content_path: path.to_string(),
                    content_type_hint: content_type,
                    length: content_length,
                    body: PageBody::Stream(stream),
                    mode: CacheMode::Skip,
                });
            }
        }

        let body = buffer.freeze();
        entry.store_file(&metadata.revision, path, body.clone());
        Ok(Served {
            status,
            content_path: path.to_string(),
            content_type_hint: content_type,
            length: Some(body.len() as u64),
            body: PageBody::Full(body),
            mode: CacheMode::Miss,
        })
    }

    fn finish(
        &self,
        served: Served,
        entry: &SiteEntry,
        metadata: &RepositoryMetadata,
        etag: &str,
    ) -> PageResponse {
        let mut headers = self.headers.clone();
        let content_type =
            content_type_for(&served.content_path, served.content_type_hint.as_deref());
        insert_header(&mut headers, CONTENT_TYPE, &content_type);
        insert_header(&mut headers, ETAG, etag);
        if let Some(date) = metadata.revision_date {
            insert_header(&mut headers, LAST_MODIFIED, &http_date(date));
        }
        if let Some(length) = served.length {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
        }
        headers.insert(
            HeaderName::from_static(CACHE_MODE_HEADER),
            HeaderValue::from_static(served.mode.as_str()),
        );
        insert_header(
            &mut headers,
            HeaderName::from_static(REVISION_HEADER),
            &metadata.revision,
        );
        headers.insert(
            HeaderName::from_static(AGE_HEADER),
            HeaderValue::from(metadata.fetched_at.elapsed().as_secs()),
        );
        headers.insert(
            HeaderName::from_static(ENTRIES_HEADER),
            HeaderValue::from(entry.cached_files() as u64),
        );

        PageResponse {
            status: served.status,
            headers,
            body: served.body,
            cache_mode: Some(served.mode),
        }
    }
}

fn cached(status: StatusCode, path: &str, body: Bytes) -> Served {
    Served {
        status,
        content_path: path.to_string(),
        content_type_hint: None,
        length: Some(body.len() as u64),
        body: PageBody::Full(body),
        mode: CacheMode::Hit,
    }
}

fn record_mode(mode: CacheMode) {
    match mode {
        CacheMode::Hit => counter!("pages_cache_file_hit_total").increment(1),
        CacheMode::Miss => counter!("pages_cache_file_miss_total").increment(1),
        CacheMode::Skip => counter!("pages_cache_file_skip_total").increment(1),
    }
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

/// Clean a decoded request path; directory paths get the default document.
///
/// `..` segments are refused rather than resolved.
pub fn normalize_request_path(path: &str, index_name: Option<&str>) -> Result<String, PagesError> {
    let mut normalized = String::with_capacity(path.len() + DEFAULT_INDEX.len());
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(PagesError::not_found("parent segments are not served")),
            segment => {
                normalized.push('/');
                normalized.push_str(segment);
            }
        }
    }
    if normalized.is_empty() || path.ends_with('/') {
        normalized.push('/');
        normalized.push_str(index_name.unwrap_or(DEFAULT_INDEX));
    }
    Ok(normalized)
}

/// Content type from the extension, then the upstream hint, then octet-stream.
pub fn content_type_for(path: &str, hint: Option<&str>) -> String {
    if let Some(mime) = mime_guess::from_path(path).first() {
        let essence = mime.essence_str();
        let textual = mime.type_() == mime_guess::mime::TEXT
            || matches!(
                essence,
                "application/javascript" | "application/json" | "image/svg+xml"
            );
        return if textual {
            format!("{essence}; charset=utf-8")
        } else {
            essence.to_string()
        };
    }
    hint.filter(|value| !value.trim().is_empty())
        .unwrap_or(OCTET_STREAM)
        .to_string()
}

/// IMF-fixdate, as used by `Last-Modified`.
pub fn http_date(value: OffsetDateTime) -> String {
    let format = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    value
        .to_offset(UtcOffset::UTC)
        .format(&format)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn directory_paths_get_index_document() {
        assert_eq!(normalize_request_path("/", None).expect("ok"), "/index.html");
        assert_eq!(normalize_request_path("", None).expect("ok"), "/index.html");
        assert_eq!(
            normalize_request_path("/docs/", Some("index.htm")).expect("ok"),
            "/docs/index.htm"
        );
        assert_eq!(
            normalize_request_path("/a//./b.css", None).expect("ok"),
            "/a/b.css"
        );
    }

    #[test]
    fn parent_segments_are_refused() {
        assert!(normalize_request_path("/../secret", None).is_err());
        assert!(normalize_request_path("/a/../../b", None).is_err());
    }

    #[test]
    fn extension_decides_content_type() {
        assert_eq!(
            content_type_for("/index.html", Some("text/plain")),
            "text/html; charset=utf-8"
        );
        assert_eq!(content_type_for("/logo.png", None), "image/png");
        assert_eq!(
            content_type_for("/LICENSE", Some("text/plain; charset=utf-8")),
            "text/plain; charset=utf-8"
        );
        assert_eq!(content_type_for("/blob", None), OCTET_STREAM);
    }

    #[test]
    fn last_modified_uses_imf_fixdate() {
        let date = datetime!(2024-03-09 17:04:05 +02:00);
        assert_eq!(http_date(date), "Sat, 09 Mar 2024 15:04:05 GMT");
    }

    #[test]
    fn redirect_carries_location() {
        let response = PageResponse::redirect(StatusCode::FOUND, "https://blog.example.com/x")
            .expect("valid location");
        assert_eq!(response.status, StatusCode::FOUND);
        assert_eq!(
            response.headers.get(LOCATION).and_then(|v| v.to_str().ok()),
            Some("https://blog.example.com/x")
        );
        assert!(response.cache_mode.is_none());
    }
}
