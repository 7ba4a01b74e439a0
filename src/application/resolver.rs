//! Maps an inbound host and path to the repository serving it.

use std::{net::IpAddr, sync::Arc};

use tracing::debug;

use crate::{
    application::error::PagesError,
    cache::{AccountCache, AliasRegistry},
    domain::RepositoryKey,
};

/// How a host was tied to its repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    /// `<account><base domain>` subdomain.
    Derived,
    /// Custom domain from the alias registry.
    Alias,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub key: RepositoryKey,
    /// Path inside the site, always starting with `/`.
    pub path: String,
    pub source: ResolutionSource,
}

pub struct DomainResolver {
    base_domain: String,
    branch: String,
    accounts: AccountCache,
    aliases: Arc<AliasRegistry>,
}

impl DomainResolver {
    pub fn new(
        base_domain: &str,
        branch: impl Into<String>,
        accounts: AccountCache,
        aliases: Arc<AliasRegistry>,
    ) -> Self {
        Self {
            base_domain: normalize_base_domain(base_domain),
            branch: branch.into(),
            accounts,
            aliases,
        }
    }

    pub fn base_domain(&self) -> &str {
        &self.base_domain
    }

    pub async fn resolve(&self, host: &str, path: &str) -> Result<Resolution, PagesError> {
        let host = normalize_host(host)?;
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };

        match host.strip_suffix(self.base_domain.as_str()) {
            Some(subdomain) => self.resolve_derived(subdomain, path).await,
            None => self.resolve_alias(&host, path),
        }
    }

    async fn resolve_derived(&self, subdomain: &str, path: String) -> Result<Resolution, PagesError> {
        let owner = subdomain.split('.').next().unwrap_or_default();
        if owner.is_empty() {
            return Err(PagesError::not_found("no account in host"));
        }
        let record = self.accounts.get(owner).await?;

        if let Some(segment) = repository_segment(&path)
            && let Some(repo) = record.canonical_name(segment)
        {
            let remainder = collapse_separators(&path[segment.len() + 1..]);
            debug!(owner, repo, path = %remainder, "Resolved project site");
            return Ok(Resolution {
                key: RepositoryKey::new(owner, repo, self.branch.as_str()),
                path: remainder,
                source: ResolutionSource::Derived,
            });
        }

        let default_site = format!("{owner}{}", self.base_domain);
        match record.canonical_name(&default_site) {
            Some(repo) => Ok(Resolution {
                key: RepositoryKey::new(owner, repo, self.branch.as_str()),
                path,
                source: ResolutionSource::Derived,
            }),
            None => Err(PagesError::not_found(format!(
                "account `{owner}` has no site for this path"
            ))),
        }
    }

    fn resolve_alias(&self, host: &str, path: String) -> Result<Resolution, PagesError> {
        let key = self
            .aliases
            .lookup(host)
            .ok_or_else(|| PagesError::not_found(format!("no site registered for `{host}`")))?;
        Ok(Resolution {
            key,
            path,
            source: ResolutionSource::Alias,
        })
    }
}

/// Lower-cased base domain with exactly one leading dot.
pub fn normalize_base_domain(domain: &str) -> String {
    format!(".{}", domain.trim().trim_matches('.').to_lowercase())
}

/// Strip the port and case-fold. Literal IP hosts are not sites.
pub fn normalize_host(host: &str) -> Result<String, PagesError> {
    if host.contains('[') {
        return Err(PagesError::NotMatched);
    }
    let host = host
        .split(':')
        .next()
        .unwrap_or_default()
        .trim()
        .trim_end_matches('.')
        .to_lowercase();
    if host.is_empty() || host.parse::<IpAddr>().is_ok() {
        return Err(PagesError::NotMatched);
    }
    Ok(host)
}

/// First path segment, only when followed by another separator.
fn repository_segment(path: &str) -> Option<&str> {
    let (segment, _) = path.strip_prefix('/')?.split_once('/')?;
    (!segment.is_empty()).then_some(segment)
}

fn collapse_separators(path: &str) -> String {
    let mut collapsed = String::with_capacity(path.len() + 1);
    for ch in path.chars() {
        if ch == '/' && collapsed.ends_with('/') {
            continue;
        }
        collapsed.push(ch);
    }
    if !collapsed.starts_with('/') {
        collapsed.insert(0, '/');
    }
    collapsed
}
