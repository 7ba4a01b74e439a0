//! Domain layer: repository identities and the markers a repository publishes about itself.

pub mod cname;
pub mod repository;
pub mod tags;

pub use cname::parse_custom_domains;
pub use repository::{DEFAULT_BRANCH, RepositoryKey};
pub use tags::SiteTags;
