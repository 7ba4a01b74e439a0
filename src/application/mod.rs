//! Request pipeline: resolution, caching tiers and response assembly.

pub mod assembler;
pub mod error;
pub mod provider;
pub mod resolver;
pub mod service;

pub use assembler::{CacheMode, PageBody, PageResponse};
pub use error::{AppError, ErrorKind, PagesError};
pub use provider::{AccountKind, Branch, ContentProvider, FileStream, ProviderError};
pub use service::{PagesOptions, PagesService, RedirectPolicy};
