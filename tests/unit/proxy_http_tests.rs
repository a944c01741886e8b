//! Unit tests for `HttpProxyService` probing and URL formatting.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use agent_proxy::config::ProxyConfig;
use agent_proxy::proxy::http::{HttpProxyService, SESSION_HEADER};
use agent_proxy::proxy::{fallback_url, ProxyService};
use agent_proxy::AppError;

fn prober(host: &str) -> HttpProxyService {
    let config = ProxyConfig {
        host: host.to_owned(),
        ..ProxyConfig::default()
    };
    HttpProxyService::new(&config, Duration::from_millis(500)).expect("client")
}

/// Serve one connection with `status_line`, returning the raw request text.
async fn serve_once(status_line: &'static str) -> (u16, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let mut buf = vec![0_u8; 4096];
        let n = socket.read(&mut buf).await.expect("read");
        let response = format!("{status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
        socket.write_all(response.as_bytes()).await.expect("write");
        socket.shutdown().await.ok();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    });

    (port, handle)
}

#[tokio::test]
async fn healthy_endpoint_is_reachable() {
    let (port, server) = serve_once("HTTP/1.1 200 OK").await;
    let proxy = prober("127.0.0.1");

    assert!(proxy.is_session_reachable("sess-1", port).await.unwrap());

    let request = server.await.unwrap();
    assert!(request.starts_with("GET /health HTTP/1.1"), "got {request}");
    assert!(
        request.to_lowercase().contains(&format!("{SESSION_HEADER}: sess-1")),
        "session header missing: {request}"
    );
}

#[tokio::test]
async fn error_status_still_counts_as_reachable() {
    let (port, _server) = serve_once("HTTP/1.1 503 Service Unavailable").await;
    let proxy = prober("127.0.0.1");

    assert!(proxy.is_session_reachable("sess-1", port).await.unwrap());
}

#[tokio::test]
async fn closed_port_is_unreachable_not_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let proxy = prober("127.0.0.1");
    assert!(!proxy.is_session_reachable("sess-1", port).await.unwrap());
}

#[tokio::test]
async fn silent_listener_times_out_as_unreachable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let _hold = tokio::spawn(async move {
        let (_socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let proxy = prober("127.0.0.1");
    assert!(!proxy.is_session_reachable("sess-1", port).await.unwrap());
}

#[tokio::test]
async fn port_zero_is_rejected() {
    let proxy = prober("127.0.0.1");
    assert!(matches!(
        proxy.is_session_reachable("sess-1", 0).await,
        Err(AppError::Validation(_))
    ));
    assert!(proxy.get_session_url("sess-1", 0).await.is_err());
}

#[tokio::test]
async fn session_url_uses_configured_scheme_and_host() {
    let config = ProxyConfig {
        scheme: "https".into(),
        host: "agents.internal".into(),
        ..ProxyConfig::default()
    };
    let proxy = HttpProxyService::new(&config, Duration::from_secs(1)).unwrap();

    assert_eq!(
        proxy.get_session_url("sess-1", 9443).await.unwrap(),
        "https://agents.internal:9443"
    );
}

#[test]
fn fallback_url_points_at_localhost() {
    assert_eq!(fallback_url(9001), "http://localhost:9001");
}
