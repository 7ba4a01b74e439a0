//! Gitea/Forgejo REST client implementing [`ContentProvider`].

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use metrics::histogram;
use reqwest::{
    Client, RequestBuilder, Response, StatusCode,
    header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue},
};
use serde::{Deserialize, de::DeserializeOwned};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::debug;
use url::Url;

use crate::{
    application::provider::{AccountKind, Branch, ContentProvider, FileStream, ProviderError},
    config::UpstreamSettings,
};

use super::error::InfraError;

const API_PREFIX: [&str; 2] = ["api", "v1"];

#[derive(Debug, Clone)]
pub struct GiteaProvider {
    client: Client,
    base: Url,
    token: Option<HeaderValue>,
    page_size: u32,
}

#[derive(Debug, Deserialize)]
struct RawBranch {
    name: String,
    commit: RawCommit,
}

#[derive(Debug, Deserialize)]
struct RawCommit {
    id: String,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTopics {
    #[serde(default)]
    topics: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawRepository {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawVersion {
    version: String,
}

impl GiteaProvider {
    pub fn new(settings: &UpstreamSettings) -> Result<Self, InfraError> {
        let mut builder = Client::builder().user_agent(Self::user_agent());
        if let Some(timeout) = settings.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|err| {
            InfraError::configuration(format!("failed to build upstream client: {err}"))
        })?;

        let token = settings
            .token
            .as_deref()
            .map(|token| {
                let mut value = HeaderValue::from_str(&format!("token {token}")).map_err(|err| {
                    InfraError::configuration(format!("invalid upstream token: {err}"))
                })?;
                value.set_sensitive(true);
                Ok::<_, InfraError>(value)
            })
            .transpose()?;

        Ok(Self {
            client,
            base: settings.server.clone(),
            token,
            page_size: settings.page_size.get(),
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("forge-pages/", env!("CARGO_PKG_VERSION"))
    }

    /// Version reported by the upstream server.
    pub async fn server_version(&self) -> Result<String, ProviderError> {
        let url = self.endpoint(&["version"])?;
        let response = self.send("version", self.client.get(url)).await?;
        let version: RawVersion = decode(response).await?;
        Ok(version.version)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ProviderError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ProviderError::transport(format!("`{}` cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(API_PREFIX)
            .extend(segments);
        Ok(url)
    }

    async fn send(
        &self,
        endpoint: &'static str,
        request: RequestBuilder,
    ) -> Result<Response, ProviderError> {
        let request = match self.token.as_ref() {
            Some(token) => request.header(AUTHORIZATION, token.clone()),
            None => request,
        };
        let started = Instant::now();
        let result = request.send().await;
        record_latency(endpoint, started.elapsed());
        result.map_err(|err| ProviderError::transport(err.to_string()))
    }

    /// Fetch every page of a list endpoint.
    async fn paginate<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        segments: &[&str],
    ) -> Result<Vec<T>, ProviderError> {
        let url = self.endpoint(segments)?;
        let limit = self.page_size.to_string();
        let mut items = Vec::new();
        let mut page = 1u32;
        loop {
            let mut page_url = url.clone();
            page_url
                .query_pairs_mut()
                .append_pair("page", &page.to_string())
                .append_pair("limit", &limit);
            let request = self.client.get(page_url);
            let response = expect_ok(url.path(), self.send(endpoint, request).await?)?;
            let batch: Vec<T> = decode(response).await?;
            let done = batch.len() < self.page_size as usize;
            items.extend(batch);
            if done {
                break;
            }
            page += 1;
        }
        Ok(items)
    }
}

#[async_trait]
impl ContentProvider for GiteaProvider {
    async fn list_branches(&self, owner: &str, repo: &str) -> Result<Vec<Branch>, ProviderError> {
        let raw: Vec<RawBranch> = self
            .paginate("branches", &["repos", owner, repo, "branches"])
            .await?;
        Ok(raw
            .into_iter()
            .map(|branch| Branch {
                name: branch.name,
                commit_date: branch
                    .commit
                    .timestamp
                    .as_deref()
                    .and_then(|value| OffsetDateTime::parse(value, &Rfc3339).ok()),
                commit_id: branch.commit.id,
            })
            .collect())
    }

    async fn list_topics(&self, owner: &str, repo: &str) -> Result<Vec<String>, ProviderError> {
        let url = self.endpoint(&["repos", owner, repo, "topics"])?;
        let path = url.path().to_string();
        let response = expect_ok(&path, self.send("topics", self.client.get(url)).await?)?;
        let topics: RawTopics = decode(response).await?;
        Ok(topics.topics)
    }

    async fn list_repositories(
        &self,
        owner: &str,
        kind: AccountKind,
    ) -> Result<Vec<String>, ProviderError> {
        let scope = match kind {
            AccountKind::Organization => "orgs",
            AccountKind::User => "users",
        };
        let raw: Vec<RawRepository> = self.paginate("repositories", &[scope, owner, "repos"]).await?;
        Ok(raw.into_iter().map(|repository| repository.name).collect())
    }

    async fn open_file(
        &self,
        owner: &str,
        repo: &str,
        reference: &str,
        path: &str,
    ) -> Result<FileStream, ProviderError> {
        let mut segments = vec!["repos", owner, repo, "media"];
        segments.extend(path.split('/').filter(|segment| !segment.is_empty()));
        let mut url = self.endpoint(&segments)?;
        url.query_pairs_mut().append_pair("ref", reference);
        let response = self.send("media", self.client.get(url)).await?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                debug!(owner, repo, reference, path, "Upstream file not found");
                return Err(ProviderError::NotFound);
            }
            status => {
                return Err(ProviderError::UnexpectedStatus {
                    endpoint: response.url().path().to_string(),
                    status: status.as_u16(),
                });
            }
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let content_length = response.content_length();
        let body = response
            .bytes_stream()
            .map_err(|err| ProviderError::transport(err.to_string()))
            .boxed();

        Ok(FileStream {
            content_length,
            content_type,
            body,
        })
    }
}

fn expect_ok(endpoint: &str, response: Response) -> Result<Response, ProviderError> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::NOT_FOUND => Err(ProviderError::NotFound),
        status => Err(ProviderError::UnexpectedStatus {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
        }),
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ProviderError> {
    let body = response
        .bytes()
        .await
        .map_err(|err| ProviderError::transport(err.to_string()))?;
    serde_json::from_slice(&body).map_err(|err| ProviderError::decode(err.to_string()))
}

fn record_latency(endpoint: &'static str, elapsed: Duration) {
    histogram!("pages_upstream_request_ms", "endpoint" => endpoint)
        .record(elapsed.as_secs_f64() * 1000.0);
}
