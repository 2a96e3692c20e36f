//! Request routing: map URL patterns and HTTP methods to handler functions.
//!
//! | Pattern                     | Example match                    | Captured params                                |
//! |-----------------------------|----------------------------------|------------------------------------------------|
//! | `/service/status`           | `/service/status`                | *(none)*                                       |
//! | `/service/repositories/:name` | `/service/repositories/helm`   | `name → "helm"`                                |
//! | `/repository/:name/*`       | `/repository/helm/index.yaml`    | `name → "helm"`, `wildcard → "/index.yaml"`     |
//!
//! A trailing `*` captures the raw remainder of the path, leading slash and
//! trailing slash included, so repository paths reach their handler untouched.
//! Other patterns ignore a single trailing slash on the request path.
//!
//! Routes are matched in registration order. `HEAD` falls back to the `GET`
//! route for the same path and drops the body. A path that matches only under
//! another method answers `405 Method Not Allowed`.

use std::future::Future;
use std::sync::Arc;

use crate::BoxFuture;
use crate::context::{Context, PathParams};
use crate::{Method, Request, Response, StatusCode};

/// Type-erased async handler that turns a [`Context`] into a [`Response`].
pub type Handler = Arc<dyn Fn(Context) -> BoxFuture<'static, Response> + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Context) -> impl Future<Output = Response> + Send` that is also
/// `Send + Sync + 'static` implements this automatically.
pub trait IntoHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> BoxFuture<'static, Response>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> BoxFuture<'static, Response> {
        Box::pin((self)(ctx))
    }
}

// A single path segment, either a literal string or a named capture (`:name`).
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Parameter(String),
}

// Compiled route pattern: fixed segments, optionally followed by `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Pattern {
    segments: Vec<Segment>,
    wildcard: bool,
}

impl Pattern {
    fn parse(pattern: &str) -> Self {
        let mut segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
        let wildcard = segments.last() == Some(&"*");
        if wildcard {
            segments.pop();
        }

        let segments = segments
            .into_iter()
            .map(|s| match s.strip_prefix(':') {
                Some(name) => Segment::Parameter(name.to_string()),
                None => Segment::Static(s.to_string()),
            })
            .collect();

        Self { segments, wildcard }
    }

    // Try to match `path`, returning the captured parameters on success.
    fn matches(&self, path: &str) -> Option<PathParams> {
        let mut params = PathParams::new();
        let mut rest = path;

        for segment in &self.segments {
            let trimmed = rest.strip_prefix('/')?;
            let end = trimmed.find('/').unwrap_or(trimmed.len());
            let (head, tail) = trimmed.split_at(end);
            if head.is_empty() {
                return None;
            }
            match segment {
                Segment::Static(s) if s == head => {}
                Segment::Static(_) => return None,
                Segment::Parameter(name) => params.insert(name.as_str(), head),
            }
            rest = tail;
        }

        if self.wildcard {
            params.insert("wildcard", rest);
            Some(params)
        } else if rest.is_empty() || rest == "/" {
            Some(params)
        } else {
            None
        }
    }
}

// A single registered route binding a method + pattern to a handler.
struct Route {
    method: Method,
    pattern: Pattern,
    handler: Handler,
}

/// HTTP request router.
///
/// # Examples
///
/// ```rust,no_run
/// use artiproxy::context::Context;
/// use artiproxy::router::Router;
/// use artiproxy::{Response, StatusCode};
///
/// let mut router = Router::new();
/// router.get("/repository/:name/*", |ctx: Context| async move {
///     let path = ctx.param("wildcard").unwrap_or("/").to_owned();
///     Response::new(StatusCode::Ok).body(path)
/// });
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, path: &str, handler: impl IntoHandler) {
        self.on(Method::Get, path, handler);
    }

    pub fn head(&mut self, path: &str, handler: impl IntoHandler) {
        self.on(Method::Head, path, handler);
    }

    pub fn post(&mut self, path: &str, handler: impl IntoHandler) {
        self.on(Method::Post, path, handler);
    }

    pub fn delete(&mut self, path: &str, handler: impl IntoHandler) {
        self.on(Method::Delete, path, handler);
    }

    /// Register a handler for an arbitrary method.
    pub fn on(&mut self, method: Method, path: &str, handler: impl IntoHandler) {
        let handler: Handler = Arc::new(move |ctx| handler.call(ctx));
        self.routes.push(Route {
            method,
            pattern: Pattern::parse(path),
            handler,
        });
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    // First route for exactly `method` whose pattern matches.
    fn find(&self, method: &Method, path: &str) -> Option<(&Handler, PathParams)> {
        self.routes
            .iter()
            .filter(|route| &route.method == method)
            .find_map(|route| route.pattern.matches(path).map(|p| (&route.handler, p)))
    }

    /// Dispatch `request` to the first matching route.
    pub async fn route(&self, request: Request) -> Response {
        let method = request.method().clone();
        let path = request.path().to_owned();

        if let Some((handler, params)) = self.find(&method, &path) {
            return handler(Context::with_params(request, params)).await;
        }

        if method == Method::Head {
            if let Some((handler, params)) = self.find(&Method::Get, &path) {
                return handler(Context::with_params(request, params))
                    .await
                    .without_body();
            }
        }

        if self.routes.iter().any(|route| route.pattern.matches(&path).is_some()) {
            return Response::new(StatusCode::MethodNotAllowed);
        }

        Response::new(StatusCode::NotFound)
    }
}
