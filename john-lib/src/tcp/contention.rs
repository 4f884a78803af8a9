//! Passage contention detection (C9 step 4): a non-manager passage shared
//! across too many distinct source IPs within a rolling window is treated
//! as leaked/shared credentials rather than legitimate reconnects.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::ContentionConfig;

struct Sightings {
    by_source: HashMap<IpAddr, Instant>,
}

pub struct ContentionTracker {
    sightings: Mutex<HashMap<String, Sightings>>,
    max_sources: usize,
    window: Duration,
}

impl ContentionTracker {
    pub fn new(config: &ContentionConfig) -> Self {
        Self { sightings: Mutex::new(HashMap::new()), max_sources: config.max_sources, window: config.window() }
    }

    /// Records a sighting of `passage_key` from `source` and returns `true`
    /// if this pushes the passage over its distinct-source budget within
    /// the rolling window.
    pub fn check(&self, passage_key: &str, source: IpAddr) -> bool {
        let mut guard = self.sightings.lock().expect("contention tracker mutex poisoned");
        let now = Instant::now();
        let entry = guard
            .entry(passage_key.to_string())
            .or_insert_with(|| Sightings { by_source: HashMap::new() });

        entry.by_source.retain(|_, seen_at| now.duration_since(*seen_at) < self.window);
        entry.by_source.insert(source, now);

        entry.by_source.len() > self.max_sources
    }
}
