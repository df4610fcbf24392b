//! TCP proxy: bidirectional byte stream relay
//!
//! Establishes the connection to the destination and relays bytes in both
//! directions with half-close semantics.

use crate::error::{GatewayError, Result};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Relay bytes bidirectionally between client and upstream
///
/// When one side finishes sending, the write side of the other is shut down
/// and the opposite direction keeps flowing. Returns once both directions
/// are done, with `(client→upstream, upstream→client)` byte counts.
pub async fn relay<C, U>(client: C, upstream: U) -> Result<(u64, u64)>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

    let client_to_upstream = async {
        let copied = tokio::io::copy(&mut client_read, &mut upstream_write).await;
        let _ = upstream_write.shutdown().await;
        copied
    };
    let upstream_to_client = async {
        let copied = tokio::io::copy(&mut upstream_read, &mut client_write).await;
        let _ = client_write.shutdown().await;
        copied
    };

    let (sent, received) = tokio::join!(client_to_upstream, upstream_to_client);
    Ok((sent?, received?))
}

/// Connect to `host:port` over plain TCP
pub async fn connect_upstream(host: &str, port: u16) -> Result<TcpStream> {
    let address = format_address(host, port);
    TcpStream::connect(&address)
        .await
        .map_err(|source| GatewayError::UpstreamConnect { address, source })
}

/// Join host and port, bracketing IPv6 literals
fn format_address(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
