//! HTTPS passthrough: routes raw TLS by SNI without terminating it
//!
//! Per connection:
//! 1. Read the PROXY v2 header and the Client Hello under one deadline
//! 2. Resolve the LinkID and ask the authorizer about the SNI hostname
//! 3. Dial `<hostname>:<upstream_port>` and replay the recorded bytes
//! 4. Relay until both sides are done
//!
//! Any failure before step 3 closes the client silently.

use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

use super::proxy_protocol::{read_proxy_header, ProxyPreamble};
use super::recorder::Recorder;
use super::sni::sniff_sni;
use super::tcp::{connect_upstream, relay};
use super::ProxyContext;
use crate::error::Result;
use crate::observability::{Outcome, Protocol};

/// Handle one connection accepted on the HTTPS listener
pub async fn handle_https<S>(stream: S, ctx: Arc<ProxyContext>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let _guard = ctx.metrics.track_connection(Protocol::Https);
    let tracker = ctx.access_log.start(Protocol::Https);

    let (preamble, client, hostname) =
        match tokio::time::timeout(ctx.sniff_timeout, accept_hello(stream)).await {
            Err(_) => {
                tracing::debug!("Timed out waiting for PROXY header and Client Hello");
                return;
            }
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Malformed connection preamble, closing");
                return;
            }
            Ok(Ok((_, _, None))) => {
                tracing::debug!("Client did not send a TLS Client Hello, closing");
                return;
            }
            Ok(Ok((preamble, client, Some(hostname)))) => (preamble, client, hostname),
        };

    let client_addr = preamble.source.map(|a| a.to_string());
    let link_id = preamble.link_id().ok().map(str::to_string);
    let decision = preamble
        .link_id()
        .and_then(|id| ctx.authorizer.decide(id, &hostname));

    match decision {
        Ok(d) if d.allowed => {
            let entry = tracker.build_entry(
                client_addr,
                link_id,
                Some(d.owner),
                hostname.clone(),
                Outcome::Allowed,
                None,
            );
            ctx.audit(&entry.with_rule(d.rule.map(|r| r.name())));
        }
        Ok(d) => {
            ctx.audit(&tracker.build_entry(
                client_addr,
                link_id,
                Some(d.owner),
                hostname,
                Outcome::Denied,
                Some("hostname not permitted".to_string()),
            ));
            return;
        }
        Err(e) => {
            ctx.audit(&tracker.build_entry(
                client_addr,
                link_id,
                None,
                hostname,
                Outcome::Denied,
                Some(e.to_string()),
            ));
            return;
        }
    }

    let upstream = match connect_upstream(&hostname, ctx.upstream_port).await {
        Ok(upstream) => upstream,
        Err(e) => {
            ctx.metrics.record_upstream_failure();
            tracing::warn!(hostname = %hostname, error = %e, "Upstream dial failed");
            return;
        }
    };

    match relay(client, upstream).await {
        Ok((sent, received)) => {
            ctx.metrics.record_bytes(sent, received);
            tracing::debug!(hostname = %hostname, sent, received, "HTTPS relay finished");
        }
        Err(e) => {
            tracing::debug!(hostname = %hostname, error = %e, "HTTPS relay ended with error");
        }
    }
}

/// Read the PROXY header, then sniff the Client Hello behind it.
///
/// The returned recorder replays everything that followed the header,
/// Client Hello included.
async fn accept_hello<S>(mut stream: S) -> Result<(ProxyPreamble, Recorder<S>, Option<String>)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut preamble = read_proxy_header(&mut stream).await?;
    let leftover = std::mem::take(&mut preamble.leftover);
    let mut client = Recorder::with_prefix(stream, leftover);
    let hostname = sniff_sni(&mut client).await;
    Ok((preamble, client, hostname))
}
