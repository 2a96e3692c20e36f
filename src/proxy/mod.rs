//! Proxying requests to a repository's origin.

pub mod protocol;
pub mod upstream;

pub use protocol::{ProxyError, ProxyProtocol, ProxyResponse};
pub use upstream::{
    ConditionalHeaders, HttpUpstreamClient, UpstreamClient, UpstreamError, UpstreamResponse,
};
