pub mod drain;
pub mod private_guard;
pub mod replay;

pub use drain::drain;
pub use private_guard::{guarded_connect, is_private, resolve_public};
pub use replay::ReplayFilter;
