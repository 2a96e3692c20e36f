//! End-to-end: a real origin and a real proxy, both on ephemeral ports.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use artiproxy::config::ServiceConfig;
use artiproxy::server::Server;
use artiproxy::service::Service;
use artiproxy::{Request, Response, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Requests seen by the origin: path → list of `If-None-Match` values (or "").
type Seen = Arc<Mutex<HashMap<String, Vec<String>>>>;

async fn start_origin() -> (SocketAddr, Seen) {
    let seen: Seen = Arc::default();
    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr();

    let log = Arc::clone(&seen);
    tokio::spawn(server.run(move |req: Request| {
        let log = Arc::clone(&log);
        async move {
            let validator = req.headers().get("if-none-match").unwrap_or("").to_owned();
            log.lock()
                .unwrap()
                .entry(req.path().to_owned())
                .or_default()
                .push(validator.clone());

            match req.path() {
                "/charts/index.yaml" if validator == "\"idx-1\"" => {
                    Response::new(StatusCode::NotModified).header("ETag", "\"idx-1\"")
                }
                "/charts/index.yaml" => Response::new(StatusCode::Ok)
                    .header("Content-Type", "text/x-yaml")
                    .header("ETag", "\"idx-1\"")
                    .body("apiVersion: v1\nentries: {}\n"),
                "/charts/nginx-1.0.0.tgz" => Response::new(StatusCode::Ok)
                    .header("Last-Modified", "Wed, 01 Mar 2023 10:00:00 GMT")
                    .body_bytes(vec![0x1f_u8, 0x8b, 0x08, 0x00]),
                "/charts/flaky.tgz" => Response::new(StatusCode::ServiceUnavailable),
                _ => Response::new(StatusCode::NotFound),
            }
        }
    }));

    (addr, seen)
}

async fn start_proxy(origin: SocketAddr) -> (SocketAddr, Service) {
    let config = ServiceConfig::from_toml_str(&format!(
        r#"
        upstream_timeout_secs = 5

        [[repositories]]
        name = "charts"
        format = "helm"
        remote_url = "http://{origin}/charts/"

        [repositories.metadata]
        ttl_seconds = 0
        "#
    ))
    .unwrap();

    let service = Service::from_config(&config).unwrap();
    service.start().unwrap();
    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr();
    tokio::spawn(server.run(service.handler()));
    (addr, service)
}

/// One request over a fresh connection; returns the status code, raw head and body.
async fn send(addr: SocketAddr, method: &str, path: &str, extra: &str) -> (u16, String, Vec<u8>) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request =
        format!("{method} {path} HTTP/1.1\r\nHost: proxy\r\n{extra}Connection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let split = raw.windows(4).position(|w| w == b"\r\n\r\n").unwrap();
    let head = String::from_utf8(raw[..split].to_vec()).unwrap();
    let body = raw[split + 4..].to_vec();
    let status = head[9..12].parse().unwrap();
    (status, head, body)
}

fn hits(seen: &Seen, path: &str) -> Vec<String> {
    seen.lock().unwrap().get(path).cloned().unwrap_or_default()
}

#[tokio::test]
async fn artifacts_are_fetched_once() {
    let (origin, seen) = start_origin().await;
    let (proxy, _service) = start_proxy(origin).await;

    for _ in 0..3 {
        let (status, head, body) = send(proxy, "GET", "/repository/charts/nginx-1.0.0.tgz", "").await;
        assert_eq!(status, 200);
        assert_eq!(body, [0x1f_u8, 0x8b, 0x08, 0x00]);
        assert!(head.contains("Last-Modified: Wed, 01 Mar 2023 10:00:00 GMT"));
    }

    assert_eq!(hits(&seen, "/charts/nginx-1.0.0.tgz").len(), 1);
}

#[tokio::test]
async fn misses_are_remembered() {
    let (origin, seen) = start_origin().await;
    let (proxy, _service) = start_proxy(origin).await;

    for _ in 0..2 {
        let (status, _, _) = send(proxy, "GET", "/repository/charts/absent-0.1.0.tgz", "").await;
        assert_eq!(status, 404);
    }
    assert_eq!(hits(&seen, "/charts/absent-0.1.0.tgz").len(), 1);

    let (status, _, _) = send(
        proxy,
        "POST",
        "/service/repositories/charts/invalidate?scope=negative",
        "",
    )
    .await;
    assert_eq!(status, 200);

    send(proxy, "GET", "/repository/charts/absent-0.1.0.tgz", "").await;
    assert_eq!(hits(&seen, "/charts/absent-0.1.0.tgz").len(), 2);
}

#[tokio::test]
async fn stale_metadata_is_revalidated_with_validators() {
    let (origin, seen) = start_origin().await;
    let (proxy, _service) = start_proxy(origin).await;

    let (first, _, body) = send(proxy, "GET", "/repository/charts/index.yaml", "").await;
    let (second, _, again) = send(proxy, "GET", "/repository/charts/index.yaml", "").await;

    assert_eq!((first, second), (200, 200));
    assert_eq!(body, again);
    assert_eq!(hits(&seen, "/charts/index.yaml"), ["", "\"idx-1\""]);
}

#[tokio::test]
async fn upstream_outage_is_not_cached() {
    let (origin, seen) = start_origin().await;
    let (proxy, _service) = start_proxy(origin).await;

    for _ in 0..2 {
        let (status, _, _) = send(proxy, "GET", "/repository/charts/flaky.tgz", "").await;
        assert_eq!(status, 502);
    }
    assert_eq!(hits(&seen, "/charts/flaky.tgz").len(), 2);
}

#[tokio::test]
async fn downstream_conditional_and_head() {
    let (origin, _) = start_origin().await;
    let (proxy, _service) = start_proxy(origin).await;

    let (status, _, _) = send(
        proxy,
        "GET",
        "/repository/charts/nginx-1.0.0.tgz",
        "If-Modified-Since: Wed, 01 Mar 2023 10:00:00 GMT\r\n",
    )
    .await;
    assert_eq!(status, 304);

    let (status, head, body) = send(proxy, "HEAD", "/repository/charts/nginx-1.0.0.tgz", "").await;
    assert_eq!(status, 200);
    assert!(head.contains("Content-Length: 4"));
    assert!(body.is_empty());
}

#[tokio::test]
async fn status_reports_repositories() {
    let (origin, _) = start_origin().await;
    let (proxy, _service) = start_proxy(origin).await;

    let (status, _, body) = send(proxy, "GET", "/service/status", "").await;
    assert_eq!(status, 200);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["repositories"][0]["name"], "charts");
    assert_eq!(json["repositories"][0]["negative_cache_enabled"], true);
}

#[tokio::test]
async fn repositories_serve_only_after_start() {
    let (origin, _) = start_origin().await;
    let config = ServiceConfig::from_toml_str(&format!(
        r#"
        [[repositories]]
        name = "charts"
        format = "helm"
        remote_url = "http://{origin}/charts/"
        "#
    ))
    .unwrap();
    let service = Service::from_config(&config).unwrap();
    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let proxy = server.local_addr();
    tokio::spawn(server.run(service.handler()));

    let (status, _, _) = send(proxy, "GET", "/repository/charts/nginx-1.0.0.tgz", "").await;
    assert_eq!(status, 503);

    service.start().unwrap();
    let (status, _, _) = send(proxy, "GET", "/repository/charts/nginx-1.0.0.tgz", "").await;
    assert_eq!(status, 200);
}
