mod error_pages;
mod middleware;
mod pages;

pub use error_pages::ErrorPages;
pub use middleware::RequestContext;
pub use pages::{PagesState, pages_layer};

use axum::{
    Router,
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    response::{IntoResponse, Response},
    routing::get,
};

use crate::application::error::ErrorReport;

use self::middleware::{log_responses, set_request_context};

/// Liveness routes first, then pages; requests no site claims reach `unmatched`.
pub fn build_router(state: PagesState) -> Router {
    let pages = Router::new()
        .fallback(unmatched)
        .layer(from_fn_with_state(state, pages_layer));

    Router::new()
        .route("/_health", get(health))
        .fallback_service(pages)
        .layer(from_fn(log_responses))
        .layer(from_fn(set_request_context))
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn unmatched() -> Response {
    let mut response = (StatusCode::NOT_FOUND, "no site is served for this host").into_response();
    ErrorReport::from_message(
        "infra::http::unmatched",
        StatusCode::NOT_FOUND,
        "request is outside the pages domain",
    )
    .attach(&mut response);
    response
}
