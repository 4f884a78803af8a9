use std::fs;
use std::path::Path;

use crate::config::types::Config;
use crate::config::validator;
use crate::error::{JohnError, Result};

pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<Config> {
    let txt = fs::read_to_string(p)
        .map_err(|e| JohnError::Config(format!("failed to read config file: {e}")))?;
    let cfg: Config = toml::from_str(&txt)
        .map_err(|e| JohnError::Config(format!("failed to parse config: {e}")))?;

    validator::validate(&cfg).map_err(JohnError::Config)?;

    Ok(cfg)
}
