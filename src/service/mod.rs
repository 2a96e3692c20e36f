//! The HTTP surface of the proxy.
//!
//! | Route                                              | Purpose                                  |
//! |----------------------------------------------------|------------------------------------------|
//! | `GET /repository/:name/*`                          | proxied artifact (HEAD answers headers)  |
//! | `GET /service/status`                              | JSON status of every repository          |
//! | `POST /service/repositories/:name/invalidate`      | `?scope=content\|metadata\|negative[&path=]` |
//! | `POST /service/repositories/:name/refresh`         | `{"paths": [...]}`, runs in the background |

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{error, info};

use crate::BoxFuture;
use crate::background::{CancelFlag, RefreshJob};
use crate::cache::{CacheManager, Content, MemoryContentStore};
use crate::config::{ConfigError, ServiceConfig};
use crate::context::Context;
use crate::format::ProxyRequest;
use crate::http::conditional::{if_none_match_matches, parse_http_date, truncate_to_seconds};
use crate::middleware::{LoggerMiddleware, Pipeline, ServerHeaderMiddleware, from_middleware};
use crate::proxy::{
    HttpUpstreamClient, ProxyError, ProxyResponse, UpstreamClient, UpstreamError,
};
use crate::repository::{
    InvalidateScope, Repositories, Repository, RepositoryError, RepositoryStatus,
};
use crate::router::{Handler, Router};
use crate::{Headers, Request, Response, StatusCode};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

/// Repositories, the region manager, and the request pipeline in front of them.
pub struct Service {
    repositories: Arc<Repositories>,
    manager: CacheManager,
    cancel: CancelFlag,
    pipeline: Pipeline,
}

#[derive(Serialize)]
struct StatusBody {
    repositories: Vec<RepositoryStatus>,
}

#[derive(Deserialize)]
struct RefreshBody {
    paths: Vec<String>,
}

impl Service {
    /// Builds every configured repository against one shared HTTP client.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, ServiceError> {
        config.validate()?;
        let upstream: Arc<dyn UpstreamClient> = Arc::new(HttpUpstreamClient::new(
            config.upstream_timeout(),
            config.max_artifact_bytes,
        )?);

        let mut repositories = Repositories::new();
        for repository in &config.repositories {
            repositories.insert(Repository::new(
                repository.clone(),
                Arc::clone(&upstream),
                Arc::new(MemoryContentStore::new()),
            )?)?;
        }
        Ok(Self::new(repositories))
    }

    pub fn new(repositories: Repositories) -> Self {
        let repositories = Arc::new(repositories);
        let cancel = CancelFlag::new();
        let router = Arc::new(routes(&repositories, &cancel));
        let endpoint: Handler = Arc::new(move |ctx: Context| -> BoxFuture<'static, Response> {
            let router = Arc::clone(&router);
            Box::pin(async move { router.route(ctx.into_request()).await })
        });
        let pipeline = Pipeline::new(
            vec![
                from_middleware(Arc::new(LoggerMiddleware)),
                from_middleware(Arc::new(ServerHeaderMiddleware::default())),
            ],
            endpoint,
        );

        Self {
            repositories,
            manager: CacheManager::new(),
            cancel,
            pipeline,
        }
    }

    pub fn repositories(&self) -> &Arc<Repositories> {
        &self.repositories
    }

    pub fn cache_manager(&self) -> &CacheManager {
        &self.manager
    }

    pub fn start(&self) -> Result<(), ServiceError> {
        self.repositories.start_all(&self.manager)?;
        info!(repositories = self.repositories.len(), "service started");
        Ok(())
    }

    /// Cancels background refreshes and stops every repository.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.repositories.stop_all();
        info!("service stopped");
    }

    /// A handler for [`Server::run`](crate::server::Server::run).
    pub fn handler(
        &self,
    ) -> impl Fn(Request) -> BoxFuture<'static, Response> + Send + Sync + Clone + 'static {
        let pipeline = self.pipeline.clone();
        move |request: Request| -> BoxFuture<'static, Response> {
            let pipeline = pipeline.clone();
            Box::pin(async move { pipeline.handle(request).await })
        }
    }

    pub async fn handle(&self, request: Request) -> Response {
        self.pipeline.handle(request).await
    }
}

fn routes(repositories: &Arc<Repositories>, cancel: &CancelFlag) -> Router {
    let mut router = Router::new();

    let repos = Arc::clone(repositories);
    router.get("/repository/:name/*", move |ctx: Context| {
        with_repository(&repos, ctx, serve_artifact)
    });

    let repos = Arc::clone(repositories);
    router.get("/service/status", move |_ctx: Context| {
        let body = StatusBody {
            repositories: repos.iter().map(|r| r.status()).collect(),
        };
        async move { Response::json(StatusCode::Ok, &body) }
    });

    let repos = Arc::clone(repositories);
    router.post("/service/repositories/:name/invalidate", move |ctx: Context| {
        with_repository(&repos, ctx, invalidate)
    });

    let repos = Arc::clone(repositories);
    let cancel = cancel.clone();
    router.post("/service/repositories/:name/refresh", move |ctx: Context| {
        let cancel = cancel.clone();
        with_repository(&repos, ctx, move |repository, ctx| refresh(repository, ctx, cancel))
    });

    router
}

// Resolves `:name`, answering 404 for unknown repositories.
fn with_repository<F, Fut>(
    repositories: &Repositories,
    ctx: Context,
    handler: F,
) -> BoxFuture<'static, Response>
where
    F: FnOnce(Arc<Repository>, Context) -> Fut,
    Fut: Future<Output = Response> + Send + 'static,
{
    let name = ctx.param("name").unwrap_or_default();
    match repositories.get(name) {
        Some(repository) => Box::pin(handler(Arc::clone(repository), ctx)),
        None => {
            let response = error_body(StatusCode::NotFound, format!("no repository named `{name}`"));
            Box::pin(async move { response })
        }
    }
}

async fn serve_artifact(repository: Arc<Repository>, ctx: Context) -> Response {
    let path = ctx.param("wildcard").unwrap_or_default();
    let request = ProxyRequest::from_http(ctx.request(), path);

    match repository.fetch(&request).await {
        Ok(ProxyResponse::Content(content)) => {
            if not_modified(ctx.request().headers(), &content) {
                not_modified_response(&content)
            } else {
                repository.adapter().to_wire_response(&content)
            }
        }
        Ok(ProxyResponse::NotFound(outcome)) => {
            error_body(StatusCode::NotFound, outcome.message)
        }
        Err(e) => error_response(&e),
    }
}

async fn invalidate(repository: Arc<Repository>, ctx: Context) -> Response {
    let request = ctx.request();
    let scope = request.query_param("scope").unwrap_or_default();
    let Some(scope) = InvalidateScope::parse(scope, request.query_param("path")) else {
        return error_body(
            StatusCode::BadRequest,
            "scope must be one of content, metadata, negative",
        );
    };
    repository.invalidate(&scope);
    Response::json(StatusCode::Ok, &repository.status())
}

async fn refresh(repository: Arc<Repository>, ctx: Context, cancel: CancelFlag) -> Response {
    let body: RefreshBody = match ctx.json() {
        Ok(body) => body,
        Err(e) => return error_body(StatusCode::BadRequest, format!("invalid refresh body: {e}")),
    };
    let count = body.paths.len();
    let name = repository.name().to_owned();
    tokio::spawn(RefreshJob::new(repository, body.paths, cancel).run());
    Response::json(
        StatusCode::Accepted,
        &json!({ "repository": name, "paths": count }),
    )
}

/// Whether the downstream client's validators still match `content`.
/// `If-None-Match` takes precedence over `If-Modified-Since`.
fn not_modified(headers: &Headers, content: &Content) -> bool {
    if let Some(header) = headers.get("if-none-match") {
        return content
            .etag()
            .is_some_and(|etag| if_none_match_matches(header, etag));
    }
    let since = headers.get("if-modified-since").and_then(parse_http_date);
    match (since, content.last_modified()) {
        (Some(since), Some(modified)) => truncate_to_seconds(modified) <= since,
        _ => false,
    }
}

fn not_modified_response(content: &Content) -> Response {
    let full = crate::format::content_response(content);
    let mut response = Response::new(StatusCode::NotModified);
    for name in ["ETag", "Last-Modified"] {
        if let Some(value) = full.headers().get(name) {
            response.add_header(name, value);
        }
    }
    response
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    let message: String = message.into();
    Response::json(status, &json!({ "error": message }))
}

fn error_response(err: &RepositoryError) -> Response {
    let status = match err {
        RepositoryError::NotStarted { .. } => StatusCode::ServiceUnavailable,
        RepositoryError::Proxy(ProxyError::Format(_)) => StatusCode::NotFound,
        RepositoryError::Proxy(ProxyError::Transport(e)) if e.is_timeout() => {
            StatusCode::GatewayTimeout
        }
        RepositoryError::Proxy(
            ProxyError::Upstream { .. }
            | ProxyError::UnexpectedStatus { .. }
            | ProxyError::Transport(_),
        ) => StatusCode::BadGateway,
        RepositoryError::Proxy(ProxyError::Store(_))
        | RepositoryError::Cache(_)
        | RepositoryError::AlreadyStarted { .. }
        | RepositoryError::Duplicate { .. } => StatusCode::InternalServerError,
    };
    if status == StatusCode::InternalServerError {
        error!(error = %err, "request failed");
    }
    error_body(status, err.to_string())
}
