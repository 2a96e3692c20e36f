//! HTTP/1.1 protocol types and parsing.
//!
//! This module provides the core HTTP primitives shared by the proxy front end
//! and the upstream client: [`Method`], [`StatusCode`], [`Headers`], [`Request`],
//! and [`Response`], plus the validator helpers in [`conditional`].

use std::fmt;

pub mod conditional;
pub mod headers;
pub mod request;
pub mod response;

pub use headers::Headers;
pub use request::Request;
pub use response::Response;

/// An HTTP response status code produced by the proxy.
///
/// Upstream statuses are handled as raw `u16` values because an origin may
/// answer with codes this enum does not name; [`StatusCode::from_u16`] maps
/// the ones we relay.
///
/// # Examples
///
/// ```
/// use artiproxy::http::StatusCode;
///
/// let status = StatusCode::NotModified;
/// assert_eq!(status.as_u16(), 304);
/// assert_eq!(StatusCode::from_u16(404), Some(StatusCode::NotFound));
/// assert_eq!(StatusCode::from_u16(299), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum StatusCode {
    // 2xx Success
    Ok = 200,
    Accepted = 202,
    NoContent = 204,

    // 3xx Redirection
    NotModified = 304,

    // 4xx Client Error
    BadRequest = 400,
    Unauthorized = 401,
    PaymentRequired = 402,
    Forbidden = 403,
    NotFound = 404,
    MethodNotAllowed = 405,
    ProxyAuthenticationRequired = 407,
    Gone = 410,
    PayloadTooLarge = 413,

    // 5xx Server Error
    InternalServerError = 500,
    BadGateway = 502,
    ServiceUnavailable = 503,
    GatewayTimeout = 504,
}

impl StatusCode {
    /// Returns the numeric status code as a `u16`.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Maps a numeric code onto a named variant, if there is one.
    pub fn from_u16(code: u16) -> Option<Self> {
        Some(match code {
            200 => Self::Ok,
            202 => Self::Accepted,
            204 => Self::NoContent,
            304 => Self::NotModified,
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            402 => Self::PaymentRequired,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            405 => Self::MethodNotAllowed,
            407 => Self::ProxyAuthenticationRequired,
            410 => Self::Gone,
            413 => Self::PayloadTooLarge,
            500 => Self::InternalServerError,
            502 => Self::BadGateway,
            503 => Self::ServiceUnavailable,
            504 => Self::GatewayTimeout,
            _ => return None,
        })
    }

    /// Returns the canonical reason phrase for this status code.
    pub fn canonical_reason(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Accepted => "Accepted",
            Self::NoContent => "No Content",
            Self::NotModified => "Not Modified",
            Self::BadRequest => "Bad Request",
            Self::Unauthorized => "Unauthorized",
            Self::PaymentRequired => "Payment Required",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::ProxyAuthenticationRequired => "Proxy Authentication Required",
            Self::Gone => "Gone",
            Self::PayloadTooLarge => "Payload Too Large",
            Self::InternalServerError => "Internal Server Error",
            Self::BadGateway => "Bad Gateway",
            Self::ServiceUnavailable => "Service Unavailable",
            Self::GatewayTimeout => "Gateway Timeout",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.canonical_reason())
    }
}

impl From<StatusCode> for u16 {
    fn from(code: StatusCode) -> u16 {
        code.as_u16()
    }
}

/// An HTTP request method.
///
/// Standard methods are represented as unit variants for zero-cost comparison.
/// Non-standard methods are captured in the `Custom` variant.
///
/// # Examples
///
/// ```
/// use artiproxy::http::Method;
///
/// let method: Method = "GET".parse().unwrap();
/// assert_eq!(method, Method::Get);
/// assert!(method.is_safe());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    /// A method the proxy does not serve.
    Custom(String),
}

impl Method {
    /// Returns the method as a string slice.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
            Self::Custom(s) => s.as_str(),
        }
    }

    /// Returns `true` for methods without side effects (RFC 9110 §9.2.1).
    ///
    /// Only safe requests are ever answered from cache.
    pub fn is_safe(&self) -> bool {
        matches!(self, Self::Get | Self::Head | Self::Options)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "OPTIONS" => Self::Options,
            other => Self::Custom(other.to_owned()),
        })
    }
}

impl AsRef<str> for Method {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_u16_covers_every_named_variant() {
        for status in [
            StatusCode::Ok,
            StatusCode::NotModified,
            StatusCode::PaymentRequired,
            StatusCode::ProxyAuthenticationRequired,
            StatusCode::GatewayTimeout,
        ] {
            assert_eq!(StatusCode::from_u16(status.as_u16()), Some(status));
        }
        assert_eq!(StatusCode::from_u16(418), None);
    }

    #[test]
    fn unknown_method_is_custom() {
        let method: Method = "PROPFIND".parse().unwrap();
        assert_eq!(method, Method::Custom("PROPFIND".into()));
        assert!(!method.is_safe());
    }
}
