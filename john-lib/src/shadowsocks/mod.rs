//! Shadowsocks AEAD tunnel framing and inbound handshake (C6).

mod connect;
mod framer;
mod handshake;

pub use connect::connect;
pub use framer::ShadowsocksStream;
pub use handshake::{accept, Accepted, Primed};
