//! Tiered caches in front of the upstream hosting API.
//!
//! - **Accounts**: which repositories an account owns.
//! - **Sites**: per-repository metadata, each entry owning a file cache.
//! - **Aliases**: custom hostnames declared by repositories.
//!
//! Account and site refreshes are single-flighted through a [`DomainLocker`]:
//! concurrent requests for one key queue behind the first and observe its
//! result instead of repeating the upstream calls.

mod accounts;
mod aliases;
pub(crate) mod config;
mod files;
mod keys;
mod lock;
mod locker;
mod sites;
mod store;

pub use accounts::{AccountCache, AccountRecord};
pub use aliases::{AliasError, AliasRegistry, AliasSnapshot, AliasTable};
pub use config::CacheConfig;
pub use files::{FileCache, FileLookup};
pub use keys::entity_tag;
pub use locker::{DomainGuard, DomainLocker};
pub use sites::{RepositoryMetadata, SiteCache, SiteEntry, SiteFetch};
pub use store::TtlStore;
