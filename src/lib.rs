//! Static pages for Gitea and Forgejo repositories.
//!
//! Requests for `<account>.<base domain>` or a custom domain are resolved to a
//! repository branch and served from tiered caches in front of the hosting API.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
