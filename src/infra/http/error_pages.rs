//! 40x/50x bodies for failed pages requests.

use std::collections::BTreeMap;

use askama::Template;
use axum::{
    http::{HeaderValue, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use tracing::{error, info};

use crate::{
    application::error::{ErrorKind, ErrorReport, PagesError},
    config::ErrorPageSettings,
    infra::error::InfraError,
};

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

#[derive(Template)]
#[template(path = "error.html")]
struct DefaultErrorPage<'a> {
    status: u16,
    reason: &'a str,
    message: &'a str,
    path: &'a str,
}

/// Configured error bodies, keyed by status (`"404"`) or class (`"40x"`).
#[derive(Debug, Clone, Default)]
pub struct ErrorPages {
    bodies: BTreeMap<String, String>,
}

impl ErrorPages {
    /// Read every configured body file.
    pub async fn load(settings: &ErrorPageSettings) -> Result<Self, InfraError> {
        let mut bodies = BTreeMap::new();
        for (key, path) in &settings.pages {
            let body = tokio::fs::read_to_string(path)
                .await
                .map_err(|source| InfraError::ErrorPage {
                    path: path.clone(),
                    source,
                })?;
            info!(key = %key, path = %path.display(), "Loaded error page");
            bodies.insert(key.clone(), body);
        }
        Ok(Self { bodies })
    }

    pub fn from_bodies(bodies: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            bodies: bodies.into_iter().collect(),
        }
    }

    pub fn render(&self, err: &PagesError, path: &str) -> Response {
        let status = err.status_code();
        let message = match err.kind() {
            ErrorKind::Internal => "The site is temporarily unavailable.".to_string(),
            ErrorKind::NotFound | ErrorKind::NotMatched => err.to_string(),
        };

        let body = match self.body_for(status) {
            Some(template) => fill_placeholders(template, status, &message, path),
            None => self.render_default(status, &message, path),
        };

        let mut response = (status, body).into_response();
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(HTML_CONTENT_TYPE));
        ErrorReport::from_error("infra::http::pages", status, err).attach(&mut response);
        response
    }

    /// The exact status body wins over the class body.
    fn body_for(&self, status: StatusCode) -> Option<&str> {
        let class = if status.is_client_error() { "40x" } else { "50x" };
        self.bodies
            .get(status.as_str())
            .or_else(|| self.bodies.get(class))
            .map(String::as_str)
    }

    fn render_default(&self, status: StatusCode, message: &str, path: &str) -> String {
        let page = DefaultErrorPage {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("Error"),
            message,
            path,
        };
        page.render().unwrap_or_else(|err| {
            error!(error = %err, "Failed to render default error page");
            format!("{} {}", status.as_u16(), page.reason)
        })
    }
}

fn fill_placeholders(template: &str, status: StatusCode, message: &str, path: &str) -> String {
    template
        .replace("{{status}}", status.as_str())
        .replace("{{message}}", &escape_html(message))
        .replace("{{path}}", &escape_html(path))
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;

    async fn body_text(response: Response) -> String {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        String::from_utf8(bytes.to_vec()).expect("utf-8")
    }

    #[tokio::test]
    async fn exact_status_beats_class() {
        let pages = ErrorPages::from_bodies([
            ("404".to_string(), "exact {{status}}".to_string()),
            ("40x".to_string(), "class {{status}}".to_string()),
        ]);
        let response = pages.render(&PagesError::not_found("gone"), "/x");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, "exact 404");
    }

    #[tokio::test]
    async fn class_body_covers_missing_status() {
        let pages = ErrorPages::from_bodies([("50x".to_string(), "down: {{path}}".to_string())]);
        let response = pages.render(&PagesError::internal("boom"), "/<a>");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            Some(HTML_CONTENT_TYPE)
        );
        assert_eq!(body_text(response).await, "down: /&lt;a&gt;");
    }

    #[tokio::test]
    async fn builtin_page_is_used_without_configuration() {
        let response = ErrorPages::default().render(&PagesError::not_found("missing"), "/a");
        assert!(response.extensions().get::<ErrorReport>().is_some());
        let body = body_text(response).await;
        assert!(body.contains("404"));
        assert!(body.contains("Not Found"));
    }

    #[tokio::test]
    async fn internal_details_stay_out_of_the_body() {
        let response = ErrorPages::default().render(&PagesError::internal("secret detail"), "/");
        let body = body_text(response).await;
        assert!(!body.contains("secret detail"));
    }
}
