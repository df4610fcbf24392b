//! TLS Client Hello sniffing
//!
//! Drives the rustls server-side acceptor just far enough to parse the
//! Client Hello, reads the SNI, then abandons the handshake. The stream is
//! wrapped in a [`Recorder`] so anything rustls writes back (alerts) is
//! swallowed and every consumed byte can be replayed to the upstream.

use rustls::server::Acceptor;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::LazyConfigAcceptor;

use super::recorder::Recorder;

/// Sniff the server name from a TLS Client Hello.
///
/// Returns `Some("")` for a valid hello without SNI and `None` when the
/// client is not speaking TLS. Recording is stopped before returning.
pub async fn sniff_sni<S>(stream: &mut Recorder<S>) -> Option<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let sni = match LazyConfigAcceptor::new(Acceptor::default(), &mut *stream).await {
        Ok(start) => Some(
            start
                .client_hello()
                .server_name()
                .unwrap_or_default()
                .to_string(),
        ),
        Err(e) => {
            tracing::debug!(error = %e, "Client Hello could not be parsed");
            None
        }
    };
    stream.stop_recording();
    sni
}
