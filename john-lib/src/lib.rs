#![forbid(unsafe_code)]

pub mod cache;
pub mod config;
pub mod crypto;
pub mod error;
pub mod metadata;
pub mod passage;
pub mod security;
pub mod shadowsocks;
pub mod tcp;
pub mod telemetry;
pub mod transport;

pub use config::{load_from_path, Config};
pub use error::{JohnError, Result};
pub use passage::{Passage, PassageRegistry, Role};
