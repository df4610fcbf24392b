//! PROXY protocol v2 header reading and private endpoint identification
//!
//! The private link service prepends a v2 header to every connection. Its
//! vendor TLV `0xEE` with subtype `0x01` carries the LinkID of the private
//! endpoint the client came through, as a little-endian `u32`.

use ppp::{v1, v2};
use std::net::{IpAddr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{GatewayError, Result};

const V2_PREFIX_LEN: usize = 12;
const V2_MINIMUM_LEN: usize = 16;
const V2_LENGTH_INDEX: usize = 14;

/// Vendor TLV type carrying the private endpoint LinkID
pub const LINK_ID_TLV_TYPE: u8 = 0xEE;
/// TLV subtype marking a private endpoint LinkID
pub const LINK_ID_SUBTYPE: u8 = 0x01;
const LINK_ID_TLV_LEN: usize = 5;

/// What was learned from the start of a connection
#[derive(Debug, Default)]
pub struct ProxyPreamble {
    link_id: Option<String>,
    /// Original client address, when the header carried one
    pub source: Option<SocketAddr>,
    /// Bytes consumed while probing that belong to the payload
    pub leftover: Vec<u8>,
}

impl ProxyPreamble {
    /// Private endpoint LinkID of the connection
    pub fn link_id(&self) -> Result<&str> {
        self.link_id.as_deref().ok_or(GatewayError::LinkIdNotFound)
    }
}

/// Read a PROXY v2 header from the start of `stream`.
///
/// If the stream does not start with the v2 signature, the probed bytes are
/// returned in [`ProxyPreamble::leftover`] and no LinkID is available. A v1
/// header or a v2 header that fails to parse is an error.
pub async fn read_proxy_header<S>(stream: &mut S) -> Result<ProxyPreamble>
where
    S: AsyncRead + Unpin,
{
    let mut prefix = [0u8; V2_MINIMUM_LEN];
    stream
        .read_exact(&mut prefix)
        .await
        .map_err(|e| GatewayError::ProxyHeader(format!("failed to read initial bytes: {}", e)))?;

    if &prefix[..V2_PREFIX_LEN] != v2::PROTOCOL_PREFIX {
        if prefix.starts_with(v1::PROTOCOL_PREFIX.as_bytes()) {
            return Err(GatewayError::ProxyHeader(
                "PROXY protocol v1 is not supported".to_string(),
            ));
        }
        return Ok(ProxyPreamble {
            leftover: prefix.to_vec(),
            ..Default::default()
        });
    }

    let length = u16::from_be_bytes([prefix[V2_LENGTH_INDEX], prefix[V2_LENGTH_INDEX + 1]]) as usize;
    let mut raw = vec![0u8; V2_MINIMUM_LEN + length];
    raw[..V2_MINIMUM_LEN].copy_from_slice(&prefix);
    stream
        .read_exact(&mut raw[V2_MINIMUM_LEN..])
        .await
        .map_err(|e| GatewayError::ProxyHeader(format!("truncated v2 header: {}", e)))?;

    let header = v2::Header::try_from(raw.as_slice())
        .map_err(|e| GatewayError::ProxyHeader(e.to_string()))?;

    Ok(ProxyPreamble {
        link_id: link_id(Some(&header)).ok(),
        source: source_address(&header),
        leftover: Vec::new(),
    })
}

/// Extract the private endpoint LinkID from a parsed header.
///
/// TLVs of the right type but wrong shape are skipped.
pub fn link_id(header: Option<&v2::Header<'_>>) -> Result<String> {
    let header = header.ok_or(GatewayError::LinkIdNotFound)?;
    header
        .tlvs()
        .flatten()
        .find(|tlv| {
            tlv.kind == LINK_ID_TLV_TYPE
                && tlv.value.len() == LINK_ID_TLV_LEN
                && tlv.value[0] == LINK_ID_SUBTYPE
        })
        .map(|tlv| {
            u32::from_le_bytes([tlv.value[1], tlv.value[2], tlv.value[3], tlv.value[4]]).to_string()
        })
        .ok_or(GatewayError::LinkIdNotFound)
}

fn source_address(header: &v2::Header<'_>) -> Option<SocketAddr> {
    match &header.addresses {
        v2::Addresses::IPv4(ip) => Some(SocketAddr::new(IpAddr::V4(ip.source_address), ip.source_port)),
        v2::Addresses::IPv6(ip) => Some(SocketAddr::new(IpAddr::V6(ip.source_address), ip.source_port)),
        _ => None,
    }
}
