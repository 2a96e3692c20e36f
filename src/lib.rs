//! # artiproxy
//!
//! A caching proxy for artifact repositories (APT, Helm, Go modules, R),
//! served over a from-scratch async HTTP/1.1 stack.
//!
//! Content fetched from an origin is kept in a content-addressed store and
//! stamped by one of two cache tiers. Each tier is invalidated in O(1) by
//! bumping its epoch. Misses are remembered in a per-repository negative cache.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use artiproxy::config::ServiceConfig;
//! use artiproxy::server::Server;
//! use artiproxy::service::Service;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::from_toml_str(r#"
//!         [[repositories]]
//!         name = "helm"
//!         format = "helm"
//!         remote_url = "http://charts.example.com/"
//!     "#)?;
//!     let service = Service::from_config(&config)?;
//!     service.start()?;
//!     let server = Server::bind(&config.listen).await?;
//!     server.run(service.handler()).await?;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::pin::Pin;

pub mod background;
pub mod cache;
pub mod config;
pub mod context;
pub mod format;
pub mod http;
pub mod middleware;
pub mod proxy;
pub mod repository;
pub mod router;
pub mod server;
pub mod service;

/// Boxed future used at the object-safe seams (stores, upstream clients, handlers).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub use cache::{CacheKey, CacheTier, Content, NegativeCache};
pub use config::{ConfigError, RepositoryConfig, ServiceConfig};
pub use format::{Format, FormatAdapter, ProxyRequest};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use proxy::{ProxyError, ProxyProtocol, ProxyResponse};
pub use repository::{Repositories, Repository, RepositoryError};
pub use server::{Server, ServerError};
pub use service::Service;
