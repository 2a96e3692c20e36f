//! Middleware pipeline: composable before/after request handler logic.
//!
//! - [`Middleware`] is implemented by every layer.
//! - [`Next`] is a cursor into the remaining chain; call [`Next::run`] to
//!   advance to the next layer, or to the endpoint once the layers run out.
//! - [`Pipeline`] owns the ordered layers plus the endpoint and turns a raw
//!   [`Request`] into a [`Response`].

use std::sync::Arc;

use tokio::time::Instant;
use tracing::info;

use crate::BoxFuture;
use crate::context::Context;
use crate::router::Handler;
use crate::{Request, Response};

/// A type-erased, reference-counted middleware function.
pub type MiddlewareHandler =
    Arc<dyn Fn(Context, Next) -> BoxFuture<'static, Response> + Send + Sync + 'static>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed by [`run`](Self::run), so each layer forwards at most once.
pub struct Next {
    middlewares: Arc<[MiddlewareHandler]>,
    // Tracks which middleware to invoke on the next `run` call.
    index: usize,
    endpoint: Handler,
}

impl Next {
    pub fn new(middlewares: Arc<[MiddlewareHandler]>, endpoint: Handler) -> Self {
        Self {
            middlewares,
            index: 0,
            endpoint,
        }
    }

    /// Invokes the next layer, or the endpoint when no layers remain.
    pub async fn run(mut self, ctx: Context) -> Response {
        match self.middlewares.get(self.index).cloned() {
            Some(handler) => {
                self.index += 1;
                handler(ctx, self).await
            }
            None => (self.endpoint)(ctx).await,
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors may pass through (`next.run(ctx).await`), short-circuit by
/// returning a [`Response`] without calling `next`, or decorate the response
/// that comes back.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<'static, Response>;
}

/// Ordered middleware layers in front of a single endpoint.
#[derive(Clone)]
pub struct Pipeline {
    middlewares: Arc<[MiddlewareHandler]>,
    endpoint: Handler,
}

impl Pipeline {
    pub fn new(middlewares: Vec<MiddlewareHandler>, endpoint: Handler) -> Self {
        Self {
            middlewares: middlewares.into(),
            endpoint,
        }
    }

    pub async fn handle(&self, request: Request) -> Response {
        Next::new(Arc::clone(&self.middlewares), Arc::clone(&self.endpoint))
            .run(Context::new(request))
            .await
    }
}

/// Logs each request's method, path, status, and duration as one structured event.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<'static, Response> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().as_str().to_string();
            let path = ctx.request().path().to_string();

            let response = next.run(ctx).await;

            info!(
                %method,
                %path,
                status = response.status().as_u16(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "request served"
            );
            response
        })
    }
}

/// Stamps every response with a `Server` header.
pub struct ServerHeaderMiddleware {
    value: String,
}

impl ServerHeaderMiddleware {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl Default for ServerHeaderMiddleware {
    fn default() -> Self {
        Self::new(concat!("artiproxy/", env!("CARGO_PKG_VERSION")))
    }
}

impl Middleware for ServerHeaderMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<'static, Response> {
        let value = self.value.clone();
        Box::pin(async move {
            let mut response = next.run(ctx).await;
            response.add_header("Server", value);
            response
        })
    }
}
