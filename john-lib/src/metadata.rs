//! SOCKS-like address header and in-band control-message framing (C7).
//!
//! Every connection's first decrypted chunk is one of these: either a
//! target address (IPv4/IPv6/domain) to relay to, or a `Msg` header
//! introducing a control request/response body handled by
//! [`crate::tcp::control`].

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{JohnError, Result};

const TYPE_IPV4: u8 = 1;
const TYPE_DOMAIN_NAME: u8 = 3;
const TYPE_IPV6: u8 = 4;
const TYPE_MSG: u8 = 0xF1;

pub const CMD_PING: u8 = 1;
pub const CMD_SYNC_PASSAGES: u8 = 2;
pub const CMD_RESPONSE: u8 = 0x80;

/// A relay target, carried in the address-typed form of a [`Metadata`]
/// header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Ipv4([u8; 4]),
    Ipv6([u8; 16]),
    Domain(String),
}

impl Target {
    pub fn host(&self) -> String {
        match self {
            Target::Ipv4(b) => std::net::Ipv4Addr::from(*b).to_string(),
            Target::Ipv6(b) => std::net::Ipv6Addr::from(*b).to_string(),
            Target::Domain(d) => d.clone(),
        }
    }
}

/// The decoded form of a connection's metadata header: either a relay
/// target with a port, or a control message header with a command and
/// body length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Metadata {
    Target { target: Target, port: u16 },
    Msg { cmd: u8, len_msg_body: u32 },
}

impl Metadata {
    /// Reads and decodes one metadata header from an already-decrypted
    /// stream (i.e. a [`crate::shadowsocks::ShadowsocksStream`]).
    pub async fn read(stream: &mut (impl AsyncRead + Unpin)) -> Result<Self> {
        let mut type_buf = [0u8; 1];
        stream.read_exact(&mut type_buf).await?;

        match type_buf[0] {
            TYPE_IPV4 => {
                let mut addr = [0u8; 4];
                stream.read_exact(&mut addr).await?;
                let port = read_port(stream).await?;
                Ok(Metadata::Target { target: Target::Ipv4(addr), port })
            }
            TYPE_IPV6 => {
                let mut addr = [0u8; 16];
                stream.read_exact(&mut addr).await?;
                let port = read_port(stream).await?;
                Ok(Metadata::Target { target: Target::Ipv6(addr), port })
            }
            TYPE_DOMAIN_NAME => {
                let mut len_buf = [0u8; 1];
                stream.read_exact(&mut len_buf).await?;
                let mut domain = vec![0u8; len_buf[0] as usize];
                stream.read_exact(&mut domain).await?;
                let domain = String::from_utf8(domain).map_err(|_| JohnError::MalformedMetadata)?;
                let port = read_port(stream).await?;
                Ok(Metadata::Target { target: Target::Domain(domain), port })
            }
            TYPE_MSG => {
                let mut cmd_buf = [0u8; 1];
                stream.read_exact(&mut cmd_buf).await?;
                let mut len_buf = [0u8; 4];
                stream.read_exact(&mut len_buf).await?;
                Ok(Metadata::Msg { cmd: cmd_buf[0], len_msg_body: u32::from_be_bytes(len_buf) })
            }
            other => Err(JohnError::UnsupportedCommand(other)),
        }
    }

    /// Encodes this header onto `out`, wire-identical to what [`Self::read`]
    /// parses back.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Metadata::Target { target: Target::Ipv4(addr), port } => {
                out.push(TYPE_IPV4);
                out.extend_from_slice(addr);
                out.extend_from_slice(&port.to_be_bytes());
            }
            Metadata::Target { target: Target::Ipv6(addr), port } => {
                out.push(TYPE_IPV6);
                out.extend_from_slice(addr);
                out.extend_from_slice(&port.to_be_bytes());
            }
            Metadata::Target { target: Target::Domain(domain), port } => {
                out.push(TYPE_DOMAIN_NAME);
                out.push(domain.len() as u8);
                out.extend_from_slice(domain.as_bytes());
                out.extend_from_slice(&port.to_be_bytes());
            }
            Metadata::Msg { cmd, len_msg_body } => {
                out.push(TYPE_MSG);
                out.push(*cmd);
                out.extend_from_slice(&len_msg_body.to_be_bytes());
            }
        }
    }

    pub async fn write(&self, stream: &mut (impl AsyncWrite + Unpin)) -> Result<()> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        stream.write_all(&buf).await?;
        Ok(())
    }
}

async fn read_port(stream: &mut (impl AsyncRead + Unpin)) -> Result<u16> {
    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf).await?;
    Ok(u16::from_be_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrips_ipv4_target() {
        let meta = Metadata::Target { target: Target::Ipv4([93, 184, 216, 34]), port: 443 };
        let mut buf = Vec::new();
        meta.encode(&mut buf);
        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(Metadata::read(&mut cursor).await.unwrap(), meta);
    }

    #[tokio::test]
    async fn roundtrips_domain_target() {
        let meta = Metadata::Target { target: Target::Domain("example.com".into()), port: 80 };
        let mut buf = Vec::new();
        meta.encode(&mut buf);
        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(Metadata::read(&mut cursor).await.unwrap(), meta);
    }

    #[tokio::test]
    async fn roundtrips_msg_header() {
        let meta = Metadata::Msg { cmd: CMD_PING, len_msg_body: 4 };
        let mut buf = Vec::new();
        meta.encode(&mut buf);
        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(Metadata::read(&mut cursor).await.unwrap(), meta);
    }

    #[tokio::test]
    async fn rejects_unknown_type() {
        let mut cursor = std::io::Cursor::new(vec![0x99]);
        assert!(Metadata::read(&mut cursor).await.is_err());
    }
}
