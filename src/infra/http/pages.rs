//! Middleware serving pages requests ahead of the inner router.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{
        HeaderMap, Method, Request, StatusCode,
        header::{CONTENT_LENGTH, ETAG, HOST, IF_NONE_MATCH},
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use percent_encoding::percent_decode_str;

use crate::application::{
    assembler::{PageBody, PageResponse},
    error::PagesError,
    service::PagesService,
};

use super::error_pages::ErrorPages;

#[derive(Clone)]
pub struct PagesState {
    pub service: PagesService,
    pub errors: Arc<ErrorPages>,
}

/// Serve GET/HEAD requests for pages hosts; anything else reaches `next`.
pub async fn pages_layer(
    State(state): State<PagesState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    if method != Method::GET && method != Method::HEAD {
        return next.run(request).await;
    }
    let Some(host) = request_host(&request) else {
        return next.run(request).await;
    };
    let raw_path = request.uri().path().to_string();
    let if_none_match = request
        .headers()
        .get(IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let Ok(path) = percent_decode_str(&raw_path).decode_utf8() else {
        let err = PagesError::not_found("request path is not valid UTF-8");
        return state.errors.render(&err, &raw_path);
    };

    match state.service.route(&host, &path).await {
        Ok(page) => into_response(page, method == Method::HEAD, if_none_match.as_deref()),
        Err(PagesError::NotMatched) => next.run(request).await,
        Err(err) => state.errors.render(&err, &path),
    }
}

fn request_host(request: &Request<Body>) -> Option<String> {
    request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| request.uri().authority().map(|authority| authority.as_str()))
        .map(str::to_string)
}

fn into_response(page: PageResponse, head: bool, if_none_match: Option<&str>) -> Response {
    let PageResponse {
        status,
        mut headers,
        body,
        ..
    } = page;

    if status == StatusCode::OK && etag_matches(&headers, if_none_match) {
        headers.remove(CONTENT_LENGTH);
        return (StatusCode::NOT_MODIFIED, headers).into_response();
    }

    let body = match body {
        _ if head => Body::empty(),
        PageBody::Empty => Body::empty(),
        PageBody::Full(bytes) => Body::from(bytes),
        PageBody::Stream(stream) => Body::from_stream(stream),
    };
    (status, headers, body).into_response()
}

fn etag_matches(headers: &HeaderMap, if_none_match: Option<&str>) -> bool {
    let (Some(etag), Some(candidates)) = (
        headers.get(ETAG).and_then(|value| value.to_str().ok()),
        if_none_match,
    ) else {
        return false;
    };
    candidates
        .split(',')
        .map(str::trim)
        .any(|candidate| candidate == "*" || candidate.trim_start_matches("W/") == etag)
}
