//! lookout-server: HTTP API and daemon configuration for Lookout.

pub mod config;
pub mod http;

pub use config::{LookoutConfig, ServerConfig};
pub use http::router;
