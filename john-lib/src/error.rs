use thiserror::Error;

/// Errors surfaced by the tunnel server.
///
/// Per-connection failures (auth, replay, abuse) are kept distinct from
/// configuration/IO errors so callers can decide whether to drop the
/// connection quietly or log loudly.
#[derive(Error, Debug)]
pub enum JohnError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no passages configured")]
    NoPassages,

    #[error("authentication failed")]
    FailAuth,

    #[error("replayed salt rejected")]
    ReplayAttack,

    #[error("passage used outside of its allowed role")]
    PassageAbuse,

    #[error("too many distinct source addresses for this passage")]
    Contention,

    #[error("refused to dial a private or reserved address: {0}")]
    DialPrivateAddress(String),

    #[error("unsupported cipher method: {0}")]
    UnsupportedMethod(String),

    #[error("malformed metadata header")]
    MalformedMetadata,

    #[error("unsupported metadata command: {0}")]
    UnsupportedCommand(u8),

    #[error("control-plane message error: {0}")]
    ControlPlane(String),

    #[error("upstream dial failed: {0}")]
    Dial(String),

    #[error("grpc transport error: {0}")]
    Grpc(String),

    #[error("aead seal/open failure")]
    Crypto,
}

pub type Result<T> = std::result::Result<T, JohnError>;
