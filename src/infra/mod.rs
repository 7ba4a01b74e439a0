//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod gitea;
pub mod http;
pub mod telemetry;
