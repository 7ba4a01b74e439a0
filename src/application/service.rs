//! Orchestrates one pages request: resolve, refresh, redirect or serve.

use std::{panic::AssertUnwindSafe, sync::Arc};

use axum::http::{HeaderMap, StatusCode};
use futures::FutureExt;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use tracing::{debug, error};

use crate::{
    application::{
        assembler::{PageResponse, ResponseAssembler},
        error::{PagesError, panic_message},
        provider::ContentProvider,
        resolver::{DomainResolver, Resolution, ResolutionSource},
    },
    cache::{AccountCache, AliasRegistry, CacheConfig, SiteCache},
    config::Settings,
    domain::DEFAULT_BRANCH,
};

/// Bytes escaped when a decoded request path is put back into a `Location`.
const LOCATION_PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Where derived-domain requests for a site with a custom domain are sent.
#[derive(Debug, Clone)]
pub struct RedirectPolicy {
    pub scheme: String,
    pub status: StatusCode,
}

impl RedirectPolicy {
    fn location(&self, host: &str, path: &str) -> String {
        format!(
            "{}://{}{}",
            self.scheme,
            host,
            utf8_percent_encode(path, LOCATION_PATH)
        )
    }
}

#[derive(Debug, Clone)]
pub struct PagesOptions {
    pub base_domain: String,
    pub branch: String,
    /// Directory inside the branch that holds the site.
    pub root_path: String,
    pub cache: CacheConfig,
    /// Added to every served file.
    pub headers: HeaderMap,
    pub redirect: Option<RedirectPolicy>,
}

impl PagesOptions {
    pub fn new(base_domain: impl Into<String>) -> Self {
        Self {
            base_domain: base_domain.into(),
            branch: DEFAULT_BRANCH.to_string(),
            root_path: String::new(),
            cache: CacheConfig::default(),
            headers: HeaderMap::new(),
            redirect: None,
        }
    }
}

impl From<&Settings> for PagesOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            base_domain: settings.pages.domain.clone(),
            branch: settings.pages.branch.clone(),
            root_path: settings.pages.root.clone(),
            cache: CacheConfig::from(&settings.cache),
            headers: settings.headers.clone(),
            redirect: settings.redirect.as_ref().map(|redirect| RedirectPolicy {
                scheme: redirect.scheme.clone(),
                status: redirect.status,
            }),
        }
    }
}

#[derive(Clone)]
pub struct PagesService {
    inner: Arc<PagesServiceInner>,
}

struct PagesServiceInner {
    resolver: DomainResolver,
    accounts: AccountCache,
    sites: SiteCache,
    aliases: Arc<AliasRegistry>,
    assembler: ResponseAssembler,
    redirect: Option<RedirectPolicy>,
}

impl PagesService {
    pub fn new(
        options: PagesOptions,
        provider: Arc<dyn ContentProvider>,
        aliases: Arc<AliasRegistry>,
    ) -> Self {
        let PagesOptions {
            base_domain,
            branch,
            root_path,
            cache,
            headers,
            redirect,
        } = options;

        let accounts = AccountCache::new(Arc::clone(&provider), cache.clone());
        let sites = SiteCache::new(
            Arc::clone(&provider),
            Arc::clone(&aliases),
            cache.clone(),
            root_path,
        );
        let resolver = DomainResolver::new(
            &base_domain,
            branch,
            accounts.clone(),
            Arc::clone(&aliases),
        );
        let assembler = ResponseAssembler::new(provider, cache.max_file_size, headers);

        Self {
            inner: Arc::new(PagesServiceInner {
                resolver,
                accounts,
                sites,
                aliases,
                assembler,
                redirect,
            }),
        }
    }

    /// Turn an inbound host and decoded path into a page response.
    pub async fn route(&self, host: &str, path: &str) -> Result<PageResponse, PagesError> {
        match AssertUnwindSafe(self.inner.route(host, path))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(&*payload);
                error!(
                    host,
                    path,
                    panic = %message,
                    backtrace = %std::backtrace::Backtrace::force_capture(),
                    "Request handling panicked"
                );
                Err(PagesError::internal(format!("request panicked: {message}")))
            }
        }
    }

    pub fn base_domain(&self) -> &str {
        self.inner.resolver.base_domain()
    }

    pub fn sites(&self) -> &SiteCache {
        &self.inner.sites
    }

    pub fn accounts(&self) -> &AccountCache {
        &self.inner.accounts
    }

    pub fn aliases(&self) -> &Arc<AliasRegistry> {
        &self.inner.aliases
    }

    /// Drop expired account and site entries; returns how many went.
    pub fn purge_expired(&self) -> usize {
        self.inner.accounts.purge_expired() + self.inner.sites.purge_expired()
    }
}

impl PagesServiceInner {
    async fn route(&self, host: &str, path: &str) -> Result<PageResponse, PagesError> {
        let Resolution { key, path, source } = self.resolver.resolve(host, path).await?;
        let fetch = self.sites.fetch(&key).await?;
        let metadata = fetch.entry.metadata();
        if !metadata.exists {
            return Err(PagesError::not_found(format!("{key} is not a published site")));
        }

        if source == ResolutionSource::Derived
            && let Some(policy) = self.redirect.as_ref()
            && let Some(domain) = metadata.custom_domains.first()
        {
            let location = policy.location(domain, &path);
            debug!(site = %key, location = %location, "Redirecting to custom domain");
            return PageResponse::redirect(policy.status, &location);
        }

        self.assembler.serve(&fetch.entry, &metadata, &path).await
    }
}
