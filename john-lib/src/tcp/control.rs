//! Control-message dispatch (C10): `Ping` and `SyncPassages`, the only two
//! commands a manager-authenticated connection may carry. Responses reuse
//! the address-header envelope with `cmd = Response`, padded per §4.6 so
//! an observer can't distinguish command/length from frame size alone.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use crate::config::BandwidthConfig;
use crate::crypto::{padding_len, DEFAULT_PADDING_LIMIT};
use crate::error::{JohnError, Result};
use crate::metadata::{Metadata, CMD_PING, CMD_RESPONSE, CMD_SYNC_PASSAGES};
use crate::passage::{PassageRegistry, PassageSpec, UserContextStore};

use super::bandwidth::Bandwidth;

/// Reads the message body, runs `cmd`, and writes a framed, padded
/// response back over `stream`. `master_key` is the authenticating
/// passage's, used to key the response padding.
pub async fn dispatch<S>(
    stream: &mut S,
    cmd: u8,
    len_msg_body: u32,
    master_key: &[u8],
    registry: &PassageRegistry,
    users: &UserContextStore,
    bandwidth: &Bandwidth,
    bandwidth_config: &BandwidthConfig,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut body = vec![0u8; len_msg_body as usize];
    stream.read_exact(&mut body).await?;

    let resp_body = match cmd {
        CMD_PING => handle_ping(&body, bandwidth, bandwidth_config)?,
        CMD_SYNC_PASSAGES => handle_sync_passages(&body, registry, users)?,
        other => return Err(JohnError::UnsupportedCommand(other)),
    };

    write_response(stream, master_key, &resp_body).await
}

fn handle_ping(body: &[u8], bandwidth: &Bandwidth, config: &BandwidthConfig) -> Result<Vec<u8>> {
    if body != b"ping" {
        warn!(body = ?String::from_utf8_lossy(body), "ping body was not the literal \"ping\"");
    }
    bandwidth.mark_alive_now();
    let resp = bandwidth.ping_response(config);
    serde_json::to_vec(&resp).map_err(|e| JohnError::ControlPlane(e.to_string()))
}

fn handle_sync_passages(
    body: &[u8],
    registry: &PassageRegistry,
    users: &UserContextStore,
) -> Result<Vec<u8>> {
    let specs: Vec<PassageSpec> =
        serde_json::from_slice(body).map_err(|e| JohnError::ControlPlane(e.to_string()))?;
    let (added, removed) = registry.sync(&specs);
    users.refresh_all();
    info!(added, removed, "synced passages from control plane");
    Ok(b"OK".to_vec())
}

async fn write_response<S>(stream: &mut S, master_key: &[u8], body: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let header = Metadata::Msg { cmd: CMD_RESPONSE, len_msg_body: body.len() as u32 };
    let mut framed = Vec::new();
    header.encode(&mut framed);
    framed.extend_from_slice(body);

    let padding = padding_len(master_key, body, DEFAULT_PADDING_LIMIT);
    framed.resize(framed.len() + padding, 0);

    stream.write_all(&framed).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::passage::{Passage, PassageSpec, Role};

    fn manager_master_key() -> Vec<u8> {
        vec![7u8; 32]
    }

    fn registry_and_users() -> (std::sync::Arc<PassageRegistry>, UserContextStore) {
        let manager = Passage::new(
            "manager",
            crate::config::CipherMethod::Chacha20Poly1305,
            manager_master_key(),
            Role::Manager,
            None,
        );
        let client = Passage::new(
            "client-a",
            crate::config::CipherMethod::Chacha20Poly1305,
            vec![1u8; 32],
            Role::Client,
            None,
        );
        let registry = std::sync::Arc::new(PassageRegistry::new(
            vec![manager, client],
            crate::config::CipherMethod::Chacha20Poly1305,
        ));
        let users = UserContextStore::new(registry.clone(), &CacheConfig::default());
        (registry, users)
    }

    /// Reads one framed `Msg`/`Response` envelope (header + body + padding)
    /// back off the wire and returns just the body, given the body length
    /// the caller already knows from its own request.
    async fn read_response_body(buf: &[u8]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(buf.to_vec());
        let header = Metadata::read(&mut cursor).await.unwrap();
        let len = match header {
            Metadata::Msg { cmd, len_msg_body } => {
                assert_eq!(cmd, CMD_RESPONSE);
                len_msg_body as usize
            }
            _ => panic!("expected a Msg header"),
        };
        let mut body = vec![0u8; len];
        tokio::io::AsyncReadExt::read_exact(&mut cursor, &mut body).await.unwrap();
        body
    }

    #[tokio::test]
    async fn ping_response_contains_bandwidth_limit_json() {
        let (registry, users) = registry_and_users();
        let bandwidth = Bandwidth::default();
        let config = BandwidthConfig { uplink_limit: 10, downlink_limit: 20 };

        // `dispatch` both reads the request body and writes the response
        // through the same `&mut S`; a duplex pair lets the two sides
        // happen independently instead of contending on one cursor position.
        let (mut a, mut b) = tokio::io::duplex(4096);
        tokio::io::AsyncWriteExt::write_all(&mut b, b"ping").await.unwrap();
        drop(b);

        dispatch(&mut a, CMD_PING, 4, &manager_master_key(), &registry, &users, &bandwidth, &config)
            .await
            .unwrap();

        let mut resp = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut a, &mut resp).await.unwrap();
        let body = read_response_body(&resp).await;
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["BandwidthLimit"]["UplinkLimit"], 10);
        assert_eq!(json["BandwidthLimit"]["DownlinkLimit"], 20);
    }

    #[tokio::test]
    async fn sync_passages_applies_to_the_registry() {
        let (registry, users) = registry_and_users();
        let bandwidth = Bandwidth::default();
        let config = BandwidthConfig::default();

        let specs = vec![PassageSpec {
            id: "client-b".into(),
            password: "pw".into(),
            method: None,
            manager: false,
            out: None,
        }];
        let body = serde_json::to_vec(&specs).unwrap();

        let (mut a, mut b) = tokio::io::duplex(4096);
        tokio::io::AsyncWriteExt::write_all(&mut b, &body).await.unwrap();
        drop(b);

        dispatch(
            &mut a,
            CMD_SYNC_PASSAGES,
            body.len() as u32,
            &manager_master_key(),
            &registry,
            &users,
            &bandwidth,
            &config,
        )
        .await
        .unwrap();

        let snapshot = registry.snapshot();
        assert!(snapshot.values().any(|p| p.id == "client-b"));
        assert!(!snapshot.values().any(|p| p.id == "client-a"));
        assert!(registry.manager().is_some());

        let mut resp = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut a, &mut resp).await.unwrap();
        let ok_body = read_response_body(&resp).await;
        assert_eq!(ok_body, b"OK");
    }

    #[tokio::test]
    async fn unknown_command_is_rejected() {
        let (registry, users) = registry_and_users();
        let bandwidth = Bandwidth::default();
        let config = BandwidthConfig::default();

        let (mut a, mut b) = tokio::io::duplex(4096);
        drop(b);

        let result =
            dispatch(&mut a, 0xEE, 0, &manager_master_key(), &registry, &users, &bandwidth, &config).await;
        assert!(matches!(result, Err(JohnError::UnsupportedCommand(0xEE))));
    }
}
