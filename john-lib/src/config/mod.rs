mod loader;
mod types;
mod validator;

pub use loader::load_from_path;
pub use types::{
    BandwidthConfig, CacheConfig, CipherMethod, Config, ContentionConfig, GrpcConfig,
    OutboundConfig, PassageConfig, ReplayConfig, TimeoutConfig,
};
pub use validator::validate;
