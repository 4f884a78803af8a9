use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

/// AEAD cipher method offered to inbound connections.
///
/// Only the pre-2022 Shadowsocks AEAD suites are supported; see
/// [`crate::crypto`] for the key-derivation rules each one implies.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CipherMethod {
    Aes128Gcm,
    Aes256Gcm,
    Chacha20Poly1305,
}

impl CipherMethod {
    pub fn key_len(self) -> usize {
        match self {
            CipherMethod::Aes128Gcm => 16,
            CipherMethod::Aes256Gcm => 32,
            CipherMethod::Chacha20Poly1305 => 32,
        }
    }
}

/// A passage as it appears in the static bootstrap config file.
///
/// Passages added later via a `SyncPassages` control message are described
/// by [`crate::passage::PassageSpec`] instead; the two shapes are kept
/// deliberately close so the wire format and the config format agree.
#[derive(Debug, Deserialize, Clone)]
pub struct PassageConfig {
    /// Human-readable label for logging; a passage's identity for
    /// `SyncPassages` diffing is its `(method, password)` credential, not
    /// this id.
    pub id: String,
    pub password: String,
    #[serde(default)]
    pub method: Option<CipherMethod>,
    /// The manager passage is immune to removal by `SyncPassages` and is
    /// the only passage allowed to send control messages.
    #[serde(default)]
    pub manager: bool,
    /// Upstream this passage's traffic should be chained through, if any.
    #[serde(default)]
    pub out: Option<OutboundConfig>,
}

/// Where to relay traffic after a passage authenticates, when that passage
/// chains to a further upstream instead of dialing the target directly.
#[derive(Debug, Deserialize, Clone)]
pub struct OutboundConfig {
    pub address: SocketAddr,
    pub password: String,
    #[serde(default)]
    pub method: Option<CipherMethod>,
}

/// gRPC listener configuration for the VMess-over-gRPC transport. The
/// service/method name is fixed by the `gun` proto, not configurable here.
#[derive(Debug, Deserialize, Clone)]
pub struct GrpcConfig {
    pub listen: SocketAddr,
}

/// Timeouts governing connection handling.
#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutConfig {
    /// Dial timeout when connecting to the target/upstream.
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_ms: u64,
    /// How long an authenticated-but-idle connection may sit before
    /// the relay gives up on it.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_ms: u64,
    /// Budget for draining a connection that failed auth, so its source
    /// cannot be distinguished from a cleanly rejected one by timing.
    #[serde(default = "default_drain_budget_ms")]
    pub drain_budget_ms: u64,
}

impl TimeoutConfig {
    pub fn dial(&self) -> Duration {
        Duration::from_millis(self.dial_ms)
    }
    pub fn idle(&self) -> Duration {
        Duration::from_millis(self.idle_ms)
    }
    pub fn drain_budget(&self) -> Duration {
        Duration::from_millis(self.drain_budget_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            dial_ms: default_dial_timeout_ms(),
            idle_ms: default_idle_timeout_ms(),
            drain_budget_ms: default_drain_budget_ms(),
        }
    }
}

fn default_dial_timeout_ms() -> u64 {
    5_000
}

fn default_idle_timeout_ms() -> u64 {
    300_000
}

fn default_drain_budget_ms() -> u64 {
    200
}

/// Sizing for the per-source-IP [`crate::passage::UserContext`] cache (C1).
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_user_context_capacity")]
    pub user_context_capacity: usize,
    #[serde(default = "default_user_context_ttl_secs")]
    pub user_context_ttl_secs: u64,
}

impl CacheConfig {
    pub fn user_context_ttl(&self) -> Duration {
        Duration::from_secs(self.user_context_ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            user_context_capacity: default_user_context_capacity(),
            user_context_ttl_secs: default_user_context_ttl_secs(),
        }
    }
}

fn default_user_context_capacity() -> usize {
    1000
}

fn default_user_context_ttl_secs() -> u64 {
    3600
}

/// Sizing for the replay filter (C2): how many recent salts are
/// remembered before the oldest half is rotated out.
#[derive(Debug, Deserialize, Clone)]
pub struct ReplayConfig {
    #[serde(default = "default_replay_capacity")]
    pub capacity_per_half: usize,
    #[serde(default = "default_replay_rotation_secs")]
    pub max_age_secs: u64,
}

impl ReplayConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            capacity_per_half: default_replay_capacity(),
            max_age_secs: default_replay_rotation_secs(),
        }
    }
}

fn default_replay_capacity() -> usize {
    100_000
}

fn default_replay_rotation_secs() -> u64 {
    120
}

/// Abuse detection: how many distinct source addresses a single
/// non-manager passage may be seen from within the rolling window (C9).
#[derive(Debug, Deserialize, Clone)]
pub struct ContentionConfig {
    #[serde(default = "default_contention_max_sources")]
    pub max_sources: usize,
    #[serde(default = "default_contention_window_secs")]
    pub window_secs: u64,
}

impl ContentionConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for ContentionConfig {
    fn default() -> Self {
        Self {
            max_sources: default_contention_max_sources(),
            window_secs: default_contention_window_secs(),
        }
    }
}

fn default_contention_max_sources() -> usize {
    3
}

fn default_contention_window_secs() -> u64 {
    60
}

/// Bandwidth quota advertised to the control plane via `Ping` responses.
/// A limit of `0` means unlimited, matching the convention used elsewhere
/// in the wire protocol for "no cap".
#[derive(Debug, Deserialize, Clone)]
pub struct BandwidthConfig {
    #[serde(default)]
    pub uplink_limit: u64,
    #[serde(default)]
    pub downlink_limit: u64,
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        Self { uplink_limit: 0, downlink_limit: 0 }
    }
}

/// Top-level node configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Address the Shadowsocks AEAD listener binds to.
    pub listen: SocketAddr,
    /// Optional gRPC (VMess-over-gRPC) listener, in addition to `listen`.
    #[serde(default)]
    pub grpc: Option<GrpcConfig>,
    /// Default cipher for passages that don't specify their own.
    #[serde(default = "default_method")]
    pub default_method: CipherMethod,
    /// Bootstrap passage set, always including exactly one manager passage.
    pub passages: Vec<PassageConfig>,
    #[serde(default)]
    pub timeout: TimeoutConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub contention: ContentionConfig,
    #[serde(default)]
    pub bandwidth: BandwidthConfig,
}

fn default_method() -> CipherMethod {
    CipherMethod::Chacha20Poly1305
}
