//! Passage bookkeeping (C4, C5): the set of credentials this node trial-
//! decrypts against, kept current via in-band `SyncPassages` control
//! messages, and the per-source-IP ordering that makes repeat trial
//! decryption cheap.

mod registry;
mod types;
mod user_context;

pub use registry::PassageRegistry;
pub use types::{Outbound, OutboundSpec, Passage, PassageSpec, Role};
pub use user_context::{UserContext, UserContextStore};
