use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::config::{CipherMethod, OutboundConfig, PassageConfig};

/// Whether a passage may send in-band control messages (Ping, SyncPassages).
///
/// A `SyncPassages` update is never allowed to grant this: every incoming
/// [`PassageSpec`] is coerced to [`Role::Client`] on the way into the
/// registry, and the bootstrap manager passage is the only one that can
/// carry [`Role::Manager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Manager,
    Client,
}

/// An upstream this passage's traffic is chained through, rather than
/// dialed at the target directly.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub address: SocketAddr,
    pub master_key: Vec<u8>,
    pub method: CipherMethod,
}

impl Outbound {
    fn from_config(cfg: &OutboundConfig, default_method: CipherMethod) -> Self {
        let method = cfg.method.unwrap_or(default_method);
        let master_key = crate::crypto::derive_master_key(method, &cfg.password);
        Self { address: cfg.address, master_key, method }
    }

    fn from_spec(spec: &OutboundSpec, default_method: CipherMethod) -> Self {
        let method = spec.method.unwrap_or(default_method);
        let master_key = crate::crypto::derive_master_key(method, &spec.password);
        Self { address: spec.address, master_key, method }
    }
}

/// Wire/JSON shape of an outbound, as carried in a `SyncPassages` payload.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutboundSpec {
    pub address: SocketAddr,
    pub password: String,
    #[serde(default)]
    pub method: Option<CipherMethod>,
}

/// Wire/JSON shape of a passage, as carried in a `SyncPassages` payload.
///
/// Deliberately close to [`PassageConfig`] so the bootstrap file and the
/// control-plane wire format describe the same thing; `manager` is accepted
/// here for round-tripping but is always ignored on the way into the
/// registry (see [`super::PassageRegistry::sync`]).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PassageSpec {
    pub id: String,
    pub password: String,
    #[serde(default)]
    pub method: Option<CipherMethod>,
    #[serde(default)]
    pub manager: bool,
    #[serde(default)]
    pub out: Option<OutboundSpec>,
}

/// A single credential this node will trial-decrypt inbound connections
/// against, plus the chaining and authority metadata that goes with it.
///
/// `id` is a human-readable label carried through from config/wire data for
/// logging; it plays no part in a passage's identity. Identity is the
/// `(method, master_key)` pair a connecting client actually has to prove
/// knowledge of — see [`Passage::key`].
pub struct Passage {
    pub id: String,
    pub method: CipherMethod,
    pub master_key: Vec<u8>,
    pub role: Role,
    pub out: Option<Outbound>,
    key: String,
}

impl Passage {
    pub fn new(
        id: impl Into<String>,
        method: CipherMethod,
        master_key: Vec<u8>,
        role: Role,
        out: Option<Outbound>,
    ) -> Self {
        let key = credential_key(method, &master_key);
        Self { id: id.into(), method, master_key, role, out, key }
    }

    pub fn from_config(cfg: &PassageConfig, default_method: CipherMethod) -> Self {
        let method = cfg.method.unwrap_or(default_method);
        let master_key = crate::crypto::derive_master_key(method, &cfg.password);
        let role = if cfg.manager { Role::Manager } else { Role::Client };
        let out = cfg.out.as_ref().map(|o| Outbound::from_config(o, default_method));
        Self::new(cfg.id.clone(), method, master_key, role, out)
    }

    /// Builds a passage from a `SyncPassages` entry. The role is always
    /// [`Role::Client`] regardless of what the spec claims: a synced
    /// passage can never grant itself manager authority.
    pub fn from_spec(spec: &PassageSpec, default_method: CipherMethod) -> Self {
        let method = spec.method.unwrap_or(default_method);
        let master_key = crate::crypto::derive_master_key(method, &spec.password);
        let out = spec.out.as_ref().map(|o| Outbound::from_spec(o, default_method));
        Self::new(spec.id.clone(), method, master_key, Role::Client, out)
    }

    /// Stable key used to diff a registry snapshot against an incoming
    /// `SyncPassages` set: derived from the credential itself, not the
    /// caller-supplied `id`, so two entries presenting the same method and
    /// password are the same passage even under different ids.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_manager(&self) -> bool {
        matches!(self.role, Role::Manager)
    }
}

/// Derives a passage's identity key from its credential. Hex-encoded rather
/// than raw bytes so it can be used as a `HashMap` key and logged without
/// leaking the key material's structure beyond what the hex already does.
fn credential_key(method: CipherMethod, master_key: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = format!("{method:?}:");
    for byte in master_key {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
