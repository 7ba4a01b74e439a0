use std::fmt;

use serde::{Deserialize, Serialize};

/// Branch served when the configuration does not name one.
pub const DEFAULT_BRANCH: &str = "gh-pages";

const KEY_SEPARATOR: char = '|';

/// One servable site: an account, one of its repositories and the branch holding the content.
///
/// Fields are case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepositoryKey {
    #[serde(alias = "Owner")]
    pub owner: String,
    #[serde(alias = "Repo")]
    pub repo: String,
    #[serde(alias = "Branch")]
    pub branch: String,
}

impl RepositoryKey {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            branch: branch.into(),
        }
    }

    /// Canonical `owner|repo|branch` form used as the cache and lock key.
    pub fn cache_key(&self) -> String {
        format!(
            "{}{KEY_SEPARATOR}{}{KEY_SEPARATOR}{}",
            self.owner, self.repo, self.branch
        )
    }
}

impl fmt::Display for RepositoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{KEY_SEPARATOR}{}{KEY_SEPARATOR}{}",
            self.owner, self.repo, self.branch
        )
    }
}
