//! Entrypoint: network listeners for HTTPS, HTTP CONNECT and health
//!
//! Binds the three listeners and runs their accept loops. Each accepted
//! connection gets its own task; an accept error is fatal to the gateway.

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioIo, TokioTimer};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

use crate::config::GatewayConfig;
use crate::dashboard::DashboardApi;
use crate::error::{GatewayError, Result};
use crate::proxy::proxy_protocol::read_proxy_header;
use crate::proxy::recorder::Recorder;
use crate::proxy::{connect, https, spawn_guarded, ProxyContext};

const LISTEN_BACKLOG: u32 = 1024;

/// The gateway's bound listeners
pub struct Listeners {
    pub https: TcpListener,
    pub http: TcpListener,
    pub health: TcpListener,
}

impl Listeners {
    /// Bind every listener named in the configuration
    pub fn bind(config: &GatewayConfig) -> Result<Self> {
        let size = config.socket_buffer_size;
        Ok(Self {
            https: bind_listener("https", &config.listeners.https, size)?,
            http: bind_listener("http", &config.listeners.http, size)?,
            health: bind_listener("health", &config.listeners.health, size)?,
        })
    }
}

/// Bind a TCP listener with address reuse and sized socket buffers
pub fn bind_listener(name: &str, address: &str, buffer_size: u32) -> Result<TcpListener> {
    let addr: SocketAddr = address.parse().map_err(|e| {
        GatewayError::Config(format!(
            "Invalid address '{}' for listener '{}': {}",
            address, name, e
        ))
    })?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.set_send_buffer_size(buffer_size)?;
    socket.set_recv_buffer_size(buffer_size)?;
    socket
        .bind(addr)
        .map_err(|e| GatewayError::Config(format!("Failed to bind {} listener on {}: {}", name, addr, e)))?;
    let listener = socket.listen(LISTEN_BACKLOG)?;

    tracing::info!(listener = name, address = %addr, "Listener bound");
    Ok(listener)
}

/// Run all accept loops until one of them fails
pub async fn serve(listeners: Listeners, ctx: Arc<ProxyContext>) -> Result<()> {
    let https_ctx = ctx.clone();
    let http_ctx = ctx.clone();
    let dashboard = ctx.dashboard.clone();
    let sniff_timeout = ctx.sniff_timeout;
    let header_read_timeout = ctx.header_read_timeout;

    tokio::try_join!(
        accept_loop("https", listeners.https, move |stream| {
            https::handle_https(stream, https_ctx.clone())
        }),
        accept_loop("http", listeners.http, move |stream| {
            connect::serve_connect(stream, http_ctx.clone())
        }),
        accept_loop("health", listeners.health, move |stream| {
            serve_health(stream, dashboard.clone(), sniff_timeout, header_read_timeout)
        }),
    )?;
    Ok(())
}

async fn accept_loop<F, Fut>(name: &'static str, listener: TcpListener, handler: F) -> Result<()>
where
    F: Fn(TcpStream) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        let (stream, remote_addr) = listener.accept().await.map_err(|e| {
            tracing::error!(listener = name, error = %e, "Failed to accept connection");
            GatewayError::Io(e)
        })?;
        tracing::trace!(listener = name, remote = %remote_addr, "Accepted connection");
        spawn_guarded(name, handler(stream));
    }
}

/// Serve HTTP health and metrics requests, behind an optional PROXY header
async fn serve_health<S>(
    mut stream: S,
    dashboard: DashboardApi,
    sniff_timeout: Duration,
    header_read_timeout: Duration,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let preamble = match tokio::time::timeout(sniff_timeout, read_proxy_header(&mut stream)).await {
        Err(_) => {
            tracing::debug!("Timed out waiting for health request");
            return;
        }
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "Malformed PROXY header on health listener, closing");
            return;
        }
        Ok(Ok(preamble)) => preamble,
    };

    let io = TokioIo::new(Recorder::replaying(stream, preamble.leftover));
    let service = service_fn(move |req: Request<Incoming>| {
        let response = dashboard.handle(req.uri().path()).into_response();
        async move { Ok::<_, Infallible>(response) }
    });

    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(header_read_timeout);
    if let Err(e) = builder.serve_connection(io, service).await {
        tracing::debug!(error = %e, "Health connection ended with error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::proxy_protocol::tests::header_with_link_id;
    use crate::proxy::testing::context;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_invalid_address() {
        let err = bind_listener("https", "not-an-address", 65536).unwrap_err();
        assert!(err.to_string().contains("Invalid address"));
        assert!(err.to_string().contains("https"));
    }

    #[tokio::test]
    async fn test_bind_ephemeral() {
        let listener = bind_listener("http", "127.0.0.1:0", 65536).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let first = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = first.local_addr().unwrap().to_string();
        assert!(bind_listener("http", &address, 65536).is_err());
    }

    #[tokio::test]
    async fn test_health_listener_serves_metrics() {
        let ctx = context(&["localhost"], 1);
        let listener = bind_listener("health", "127.0.0.1:0", 65536).unwrap();
        let addr = listener.local_addr().unwrap();
        let dashboard = ctx.dashboard.clone();
        tokio::spawn(accept_loop("health", listener, move |stream| {
            serve_health(
                stream,
                dashboard.clone(),
                Duration::from_secs(10),
                Duration::from_secs(10),
            )
        }));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: gateway\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut body = String::new();
        client.read_to_string(&mut body).await.unwrap();
        assert!(body.starts_with("HTTP/1.1 200"), "{}", body);
        assert!(body.contains("gateway_connections_total"));
    }

    #[tokio::test]
    async fn test_health_listener_accepts_proxy_header() {
        let ctx = context(&["localhost"], 1);
        ctx.authorizer.registry().mark_refreshed(chrono::Utc::now());
        let listener = bind_listener("health", "127.0.0.1:0", 65536).unwrap();
        let addr = listener.local_addr().unwrap();
        let dashboard = ctx.dashboard.clone();
        tokio::spawn(accept_loop("health", listener, move |stream| {
            serve_health(
                stream,
                dashboard.clone(),
                Duration::from_secs(10),
                Duration::from_secs(10),
            )
        }));

        let mut request = header_with_link_id(1234);
        request.extend_from_slice(
            b"GET /healthz/ready HTTP/1.1\r\nHost: gateway\r\nConnection: close\r\n\r\n",
        );
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&request).await.unwrap();
        let mut body = String::new();
        client.read_to_string(&mut body).await.unwrap();
        assert!(body.starts_with("HTTP/1.1 200"), "{}", body);
    }
}
