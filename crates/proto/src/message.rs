//! Record shapes exchanged between client and server, and their TLV
//! binary encoding.
//!
//! Each TCP connection carries exactly one record in each direction.
//! Every record is framed on the wire as a big-endian `u32` byte length
//! followed by that many bytes of TLV-encoded fields, so a decoder never
//! needs to guess where a record ends. Fields that are strings are
//! themselves length-prefixed with a big-endian `u16`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("record truncated")]
    Truncated,
    #[error("field was not valid utf-8")]
    InvalidUtf8,
    #[error("unknown request type tag: {0}")]
    UnknownRequestType(String),
    #[error("unknown probe tag: {0}")]
    UnknownProbeTag(String),
    #[error("record exceeds maximum size")]
    TooLarge,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

const MAX_RECORD_LEN: u32 = 1 << 16;

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn get_str(buf: &mut Bytes) -> Result<String, ProtocolError> {
    if buf.remaining() < 2 {
        return Err(ProtocolError::Truncated);
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(ProtocolError::Truncated);
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
}

fn put_ip(buf: &mut BytesMut, ip: IpAddr) {
    match ip {
        IpAddr::V4(v4) => {
            buf.put_u8(4);
            buf.put_slice(&v4.octets());
        }
        IpAddr::V6(v6) => {
            buf.put_u8(6);
            buf.put_slice(&v6.octets());
        }
    }
}

fn get_ip(buf: &mut Bytes) -> Result<IpAddr, ProtocolError> {
    if buf.remaining() < 1 {
        return Err(ProtocolError::Truncated);
    }
    match buf.get_u8() {
        4 => {
            if buf.remaining() < 4 {
                return Err(ProtocolError::Truncated);
            }
            let mut octets = [0u8; 4];
            buf.copy_to_slice(&mut octets);
            Ok(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        6 => {
            if buf.remaining() < 16 {
                return Err(ProtocolError::Truncated);
            }
            let mut octets = [0u8; 16];
            buf.copy_to_slice(&mut octets);
            Ok(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => Err(ProtocolError::Truncated),
    }
}

/// Which kind of client request is being made. The wire tag is the
/// string used by the request; the probe's NAT-class tags (see
/// `NatClass::probe_tag`) live in a disjoint namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    ExternalAddressDiscovery,
    NatTypeDiscovery,
}

impl RequestType {
    fn as_tag(self) -> &'static str {
        match self {
            Self::ExternalAddressDiscovery => "External Address Discovery",
            Self::NatTypeDiscovery => "Nat Type Discovery",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "External Address Discovery" => Some(Self::ExternalAddressDiscovery),
            "Nat Type Discovery" => Some(Self::NatTypeDiscovery),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    pub request_type: RequestType,
    pub local_host: IpAddr,
    pub local_port: u16,
}

impl ClientRequest {
    fn encode(&self, buf: &mut BytesMut) {
        put_str(buf, self.request_type.as_tag());
        put_ip(buf, self.local_host);
        buf.put_u16(self.local_port);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        let tag = get_str(buf)?;
        let request_type = RequestType::from_tag(&tag).ok_or_else(|| {
            log::debug!("decode ClientRequest: unknown request type tag {tag:?}");
            ProtocolError::UnknownRequestType(tag.clone())
        })?;
        let local_host = get_ip(buf)?;
        if buf.remaining() < 2 {
            return Err(ProtocolError::Truncated);
        }
        let local_port = buf.get_u16();
        Ok(Self {
            request_type,
            local_host,
            local_port,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerResponse {
    pub client_local_host: IpAddr,
    pub client_local_port: u16,
    pub client_mapped_host: IpAddr,
    pub client_mapped_port: u16,
    pub server_host1: IpAddr,
    pub server_host2: IpAddr,
    pub server_port1: u16,
    pub server_port2: u16,
}

impl ServerResponse {
    fn encode(&self, buf: &mut BytesMut) {
        put_ip(buf, self.client_local_host);
        buf.put_u16(self.client_local_port);
        put_ip(buf, self.client_mapped_host);
        buf.put_u16(self.client_mapped_port);
        put_ip(buf, self.server_host1);
        put_ip(buf, self.server_host2);
        buf.put_u16(self.server_port1);
        buf.put_u16(self.server_port2);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        let client_local_host = get_ip(buf)?;
        if buf.remaining() < 2 {
            return Err(ProtocolError::Truncated);
        }
        let client_local_port = buf.get_u16();
        let client_mapped_host = get_ip(buf)?;
        if buf.remaining() < 2 {
            return Err(ProtocolError::Truncated);
        }
        let client_mapped_port = buf.get_u16();
        let server_host1 = get_ip(buf)?;
        let server_host2 = get_ip(buf)?;
        if buf.remaining() < 4 {
            return Err(ProtocolError::Truncated);
        }
        let server_port1 = buf.get_u16();
        let server_port2 = buf.get_u16();
        Ok(Self {
            client_local_host,
            client_local_port,
            client_mapped_host,
            client_mapped_port,
            server_host1,
            server_host2,
            server_port1,
            server_port2,
        })
    }
}

/// Probe sent from server to the client's mapped endpoint, naming which
/// NAT-class label the client should record on receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerRequest {
    pub label: crate::nat::NatClass,
}

impl ServerRequest {
    fn encode(&self, buf: &mut BytesMut) {
        let tag = self
            .label
            .probe_tag()
            .expect("ServerRequest label must be a probe-eligible NAT class");
        put_str(buf, tag);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        let tag = get_str(buf)?;
        let label = crate::nat::NatClass::from_probe_tag(&tag).ok_or_else(|| {
            log::debug!("decode ServerRequest: unknown probe tag {tag:?}");
            ProtocolError::UnknownProbeTag(tag.clone())
        })?;
        Ok(Self { label })
    }
}

/// Empty acknowledgement sent back by the probe recipient. Its only
/// purpose is to let the probing side's decode succeed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientResponse;

impl ClientResponse {
    fn encode(&self, _buf: &mut BytesMut) {}

    fn decode(_buf: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self)
    }
}

async fn write_framed<W, F>(stream: &mut W, encode: F) -> Result<(), ProtocolError>
where
    W: tokio::io::AsyncWrite + Unpin,
    F: FnOnce(&mut BytesMut),
{
    let mut body = BytesMut::new();
    encode(&mut body);
    if body.len() as u32 > MAX_RECORD_LEN {
        return Err(ProtocolError::TooLarge);
    }
    stream.write_u32(body.len() as u32).await?;
    stream.write_all(&body).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_framed<R>(stream: &mut R) -> Result<Bytes, ProtocolError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let len = stream.read_u32().await?;
    if len > MAX_RECORD_LEN {
        log::debug!("read_framed: record length {len} exceeds maximum {MAX_RECORD_LEN}");
        return Err(ProtocolError::TooLarge);
    }
    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).await?;
    Ok(Bytes::from(body))
}

macro_rules! impl_codec {
    ($ty:ty) => {
        impl $ty {
            pub async fn write_to<W>(&self, stream: &mut W) -> Result<(), ProtocolError>
            where
                W: tokio::io::AsyncWrite + Unpin,
            {
                write_framed(stream, |buf| self.encode(buf)).await
            }

            pub async fn read_from<R>(stream: &mut R) -> Result<Self, ProtocolError>
            where
                R: tokio::io::AsyncRead + Unpin,
            {
                let mut body = read_framed(stream).await?;
                Self::decode(&mut body)
            }
        }
    };
}

impl_codec!(ClientRequest);
impl_codec!(ServerResponse);
impl_codec!(ServerRequest);
impl_codec!(ClientResponse);
