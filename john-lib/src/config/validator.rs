use crate::config::types::Config;

pub fn validate(config: &Config) -> Result<(), String> {
    if config.passages.is_empty() {
        return Err("at least one passage is required".into());
    }

    let manager_count = config.passages.iter().filter(|p| p.manager).count();
    if manager_count != 1 {
        return Err(format!(
            "exactly one passage must be marked manager = true, found {manager_count}"
        ));
    }

    let mut seen = std::collections::HashSet::new();
    for passage in &config.passages {
        if passage.password.is_empty() {
            return Err(format!("passage {:?} has an empty password", passage.id));
        }
        if !seen.insert(passage.id.as_str()) {
            return Err(format!("duplicate passage id {:?}", passage.id));
        }
    }

    if config.timeout.dial_ms == 0 {
        return Err("timeout.dial_ms must be > 0".into());
    }
    if config.timeout.idle_ms == 0 {
        return Err("timeout.idle_ms must be > 0".into());
    }
    if config.cache.user_context_capacity == 0 {
        return Err("cache.user_context_capacity must be > 0".into());
    }
    if config.contention.max_sources == 0 {
        return Err("contention.max_sources must be > 0".into());
    }

    Ok(())
}
