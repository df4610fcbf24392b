//! HTTP CONNECT proxy: tunnels to port 443 of authorized hosts
//!
//! The listener speaks HTTP/1.1 behind a PROXY v2 header. A `CONNECT
//! host:443` from an authorized private endpoint gets `200` and an opaque
//! tunnel; everything else is refused. The readiness probe is answered
//! here as well so load balancers can health-check this listener.

use bytes::Bytes;
use http::uri::Authority;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::HOST;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::upgrade::OnUpgrade;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

use super::proxy_protocol::read_proxy_header;
use super::recorder::Recorder;
use super::tcp::{connect_upstream, relay};
use super::{spawn_guarded, ProxyContext};
use crate::dashboard::READY_PATH;
use crate::error::GatewayError;
use crate::observability::{ConnectionGuard, Outcome, Protocol};

/// The only port a tunnel may target
pub const CONNECT_PORT: u16 = 443;

/// Identity of the client behind the PROXY header
#[derive(Debug, Clone, Default)]
struct ClientInfo {
    client: Option<String>,
    link_id: Option<String>,
}

/// Destination of a CONNECT request
#[derive(Debug, Clone, PartialEq, Eq)]
struct ConnectTarget {
    host: String,
    port: u16,
}

/// Serve one connection accepted on the HTTP listener
pub async fn serve_connect<S>(mut stream: S, ctx: Arc<ProxyContext>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    // Shared with every tunnel spawned from this connection
    let guard = Arc::new(ctx.metrics.track_connection(Protocol::Http));

    let preamble = match tokio::time::timeout(ctx.sniff_timeout, read_proxy_header(&mut stream)).await
    {
        Err(_) => {
            tracing::debug!("Timed out waiting for PROXY header");
            return;
        }
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "Malformed PROXY header, closing");
            return;
        }
        Ok(Ok(preamble)) => preamble,
    };

    let info = Arc::new(ClientInfo {
        client: preamble.source.map(|a| a.to_string()),
        link_id: preamble.link_id().ok().map(str::to_string),
    });
    let header_read_timeout = ctx.header_read_timeout;
    let io = TokioIo::new(Recorder::replaying(stream, preamble.leftover));

    let service = service_fn(move |req| {
        let response = handle_request(req, &ctx, &info, &guard);
        async move { Ok::<_, Infallible>(response) }
    });

    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(header_read_timeout);
    if let Err(e) = builder.serve_connection(io, service).with_upgrades().await {
        tracing::debug!(error = %e, "HTTP connection ended with error");
    }
}

fn handle_request(
    req: Request<Incoming>,
    ctx: &Arc<ProxyContext>,
    info: &ClientInfo,
    guard: &Arc<ConnectionGuard>,
) -> Response<Full<Bytes>> {
    if req.method() == Method::GET && req.uri().path() == READY_PATH {
        return ctx.dashboard.readiness().into_response();
    }
    if req.method() != Method::CONNECT {
        return status(StatusCode::METHOD_NOT_ALLOWED);
    }

    let tracker = ctx.access_log.start(Protocol::Http);
    let Some(target) = connect_target(&req) else {
        tracing::debug!(uri = %req.uri(), "CONNECT without a usable target");
        return status(StatusCode::BAD_REQUEST);
    };

    let decision = match &info.link_id {
        Some(id) => ctx.authorizer.decide(id, &target.host),
        None => Err(GatewayError::LinkIdNotFound),
    };
    let (owner, rule, reason) = match decision {
        Ok(d) if d.allowed && target.port == CONNECT_PORT => {
            (Some(d.owner), d.rule.map(|r| r.name()), None)
        }
        Ok(d) if d.allowed => (
            Some(d.owner),
            None,
            Some(format!("port {} not permitted", target.port)),
        ),
        Ok(d) => (Some(d.owner), None, Some("hostname not permitted".to_string())),
        Err(e) => (None, None, Some(e.to_string())),
    };
    let outcome = if reason.is_none() {
        Outcome::Allowed
    } else {
        Outcome::Denied
    };
    let entry = tracker.build_entry(
        info.client.clone(),
        info.link_id.clone(),
        owner,
        target.host.clone(),
        outcome,
        reason,
    );
    ctx.audit(&entry.with_rule(rule));
    if outcome == Outcome::Denied {
        return status(StatusCode::FORBIDDEN);
    }

    let upgrade = hyper::upgrade::on(req);
    let ctx = ctx.clone();
    let guard = guard.clone();
    spawn_guarded("connect-tunnel", async move {
        let _guard = guard;
        tunnel(upgrade, target.host, ctx).await;
    });
    status(StatusCode::OK)
}

/// Dial the destination once the client side is upgraded, then relay.
///
/// The client has already been told `200`, so a dial failure can only
/// close the tunnel.
async fn tunnel(upgrade: OnUpgrade, host: String, ctx: Arc<ProxyContext>) {
    let upgraded = match upgrade.await {
        Ok(upgraded) => upgraded,
        Err(e) => {
            tracing::debug!(error = %e, "CONNECT upgrade failed");
            return;
        }
    };

    let upstream = match connect_upstream(&host, ctx.upstream_port).await {
        Ok(upstream) => upstream,
        Err(e) => {
            ctx.metrics.record_upstream_failure();
            tracing::warn!(hostname = %host, error = %e, "Upstream dial failed");
            return;
        }
    };

    match relay(TokioIo::new(upgraded), upstream).await {
        Ok((sent, received)) => {
            ctx.metrics.record_bytes(sent, received);
            tracing::debug!(hostname = %host, sent, received, "CONNECT tunnel finished");
        }
        Err(e) => {
            tracing::debug!(hostname = %host, error = %e, "CONNECT tunnel ended with error");
        }
    }
}

/// Target from the request URI, falling back to the Host header
fn connect_target<B>(req: &Request<B>) -> Option<ConnectTarget> {
    let authority = match req.uri().authority() {
        Some(authority) => authority.clone(),
        None => req
            .headers()
            .get(HOST)?
            .to_str()
            .ok()?
            .parse::<Authority>()
            .ok()?,
    };
    let port = authority.port_u16()?;
    let host = authority
        .host()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    Some(ConnectTarget { host, port })
}

fn status(code: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = code;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::proxy_protocol::tests::header_with_link_id;
    use crate::proxy::testing::context;
    use chrono::Utc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::net::TcpListener;

    /// Read a response head, up to and including the blank line
    async fn read_head(stream: &mut DuplexStream) -> String {
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            if stream.read(&mut byte).await.unwrap() == 0 {
                break;
            }
            head.push(byte[0]);
        }
        String::from_utf8(head).unwrap()
    }

    async fn send(ctx: Arc<ProxyContext>, link_id: Option<u32>, request: &str) -> (DuplexStream, String) {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(serve_connect(server, ctx));
        let mut bytes = link_id.map(header_with_link_id).unwrap_or_default();
        bytes.extend_from_slice(request.as_bytes());
        client.write_all(&bytes).await.unwrap();
        let head = read_head(&mut client).await;
        (client, head)
    }

    // --- Target parsing ---

    #[test]
    fn test_connect_target_from_uri() {
        let req = Request::builder()
            .method(Method::CONNECT)
            .uri("account1.blob.core.windows.net:443")
            .body(())
            .unwrap();
        assert_eq!(
            connect_target(&req),
            Some(ConnectTarget {
                host: "account1.blob.core.windows.net".to_string(),
                port: 443,
            })
        );
    }

    #[test]
    fn test_connect_target_host_header_fallback() {
        let req = Request::builder()
            .method(Method::CONNECT)
            .uri("/")
            .header(HOST, "login.microsoftonline.com:443")
            .body(())
            .unwrap();
        let target = connect_target(&req).unwrap();
        assert_eq!(target.host, "login.microsoftonline.com");
        assert_eq!(target.port, 443);
    }

    #[test]
    fn test_connect_target_requires_port() {
        let req = Request::builder()
            .method(Method::CONNECT)
            .uri("/")
            .header(HOST, "login.microsoftonline.com")
            .body(())
            .unwrap();
        assert!(connect_target(&req).is_none());
    }

    // --- Tunnels ---

    #[tokio::test]
    async fn test_allowed_tunnel() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ctx = context(&["localhost"], listener.local_addr().unwrap().port());

        let (mut client, head) = send(
            ctx.clone(),
            Some(1234),
            "CONNECT localhost:443 HTTP/1.1\r\nHost: localhost:443\r\n\r\n",
        )
        .await;
        assert!(head.starts_with("HTTP/1.1 200"), "{}", head);

        let (mut upstream, _) = listener.accept().await.unwrap();
        client.write_all(b"hello").await.unwrap();
        let mut got = [0u8; 5];
        upstream.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"hello");

        upstream.write_all(b"world").await.unwrap();
        client.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"world");

        assert_eq!(ctx.metrics.snapshot().connections_total["http/allowed"], 1);
    }

    #[tokio::test]
    async fn test_wrong_port_forbidden() {
        let ctx = context(&["localhost"], 1);
        let (_client, head) = send(
            ctx.clone(),
            Some(1234),
            "CONNECT localhost:8443 HTTP/1.1\r\nHost: localhost:8443\r\n\r\n",
        )
        .await;
        assert!(head.starts_with("HTTP/1.1 403"), "{}", head);
        assert_eq!(ctx.metrics.snapshot().connections_total["http/denied"], 1);
    }

    #[tokio::test]
    async fn test_unlisted_host_forbidden() {
        let ctx = context(&["localhost"], 1);
        let (_client, head) = send(
            ctx,
            Some(1234),
            "CONNECT evil.example.com:443 HTTP/1.1\r\nHost: evil.example.com:443\r\n\r\n",
        )
        .await;
        assert!(head.starts_with("HTTP/1.1 403"), "{}", head);
    }

    #[tokio::test]
    async fn test_own_storage_allowed_other_forbidden() {
        let ctx = context(&[], 1);
        let (_client, head) = send(
            ctx.clone(),
            Some(1234),
            "CONNECT account1.blob.invalid:443 HTTP/1.1\r\n\r\n",
        )
        .await;
        assert!(head.starts_with("HTTP/1.1 200"), "{}", head);

        let (_client, head) = send(
            ctx.clone(),
            Some(1234),
            "CONNECT account2.blob.invalid:443 HTTP/1.1\r\n\r\n",
        )
        .await;
        assert!(head.starts_with("HTTP/1.1 403"), "{}", head);

        let snap = ctx.metrics.snapshot();
        assert_eq!(snap.connections_total["http/allowed"], 1);
        assert_eq!(snap.connections_total["http/denied"], 1);
    }

    #[tokio::test]
    async fn test_missing_proxy_header_forbidden() {
        let ctx = context(&["localhost"], 1);
        let (_client, head) = send(
            ctx,
            None,
            "CONNECT localhost:443 HTTP/1.1\r\nHost: localhost:443\r\n\r\n",
        )
        .await;
        assert!(head.starts_with("HTTP/1.1 403"), "{}", head);
    }

    #[tokio::test]
    async fn test_unknown_link_id_forbidden() {
        let ctx = context(&["localhost"], 1);
        let (_client, head) = send(
            ctx,
            Some(42),
            "CONNECT localhost:443 HTTP/1.1\r\nHost: localhost:443\r\n\r\n",
        )
        .await;
        assert!(head.starts_with("HTTP/1.1 403"), "{}", head);
    }

    // --- Other methods ---

    #[tokio::test]
    async fn test_readiness_probe() {
        let ctx = context(&["localhost"], 1);
        let (_client, head) = send(
            ctx.clone(),
            Some(1234),
            "GET /healthz/ready HTTP/1.1\r\nHost: gateway\r\n\r\n",
        )
        .await;
        assert!(head.starts_with("HTTP/1.1 500"), "{}", head);

        ctx.authorizer.registry().mark_refreshed(Utc::now());
        let (_client, head) = send(
            ctx,
            None,
            "GET /healthz/ready HTTP/1.1\r\nHost: gateway\r\n\r\n",
        )
        .await;
        assert!(head.starts_with("HTTP/1.1 200"), "{}", head);
    }

    #[tokio::test]
    async fn test_other_methods_rejected() {
        let ctx = context(&["localhost"], 1);
        let (_client, head) = send(
            ctx.clone(),
            Some(1234),
            "GET /anything HTTP/1.1\r\nHost: localhost\r\n\r\n",
        )
        .await;
        assert!(head.starts_with("HTTP/1.1 405"), "{}", head);
        assert_eq!(ctx.access_log.total_entries(), 0);
    }
}
