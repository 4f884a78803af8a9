//! Replay protection for connection salts (C2).
//!
//! Mirrors the dual-buffer rotation the rate limiter uses for sliding
//! windows: two halves are kept, `current` and `previous`. A salt is
//! rejected if it's present in either half; new salts go into `current`.
//! When `current` fills up or grows stale, it becomes `previous` and a
//! fresh, empty half takes its place. Exact set membership is used rather
//! than a probabilistic sketch, trading some memory for a guaranteed-zero
//! false-positive rate.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Half {
    salts: HashSet<Vec<u8>>,
    opened_at: Instant,
}

impl Half {
    fn new() -> Self {
        Self { salts: HashSet::new(), opened_at: Instant::now() }
    }
}

struct Inner {
    current: Half,
    previous: Half,
}

pub struct ReplayFilter {
    inner: Mutex<Inner>,
    capacity_per_half: usize,
    max_age: Duration,
}

impl ReplayFilter {
    pub fn new(capacity_per_half: usize, max_age: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner { current: Half::new(), previous: Half::new() }),
            capacity_per_half,
            max_age,
        }
    }

    /// Returns `true` if `salt` was not seen before and has now been
    /// recorded; `false` if it's a replay and must be rejected.
    pub fn check_and_insert(&self, salt: &[u8]) -> bool {
        let mut inner = self.inner.lock().expect("replay filter mutex poisoned");

        if inner.current.salts.contains(salt) || inner.previous.salts.contains(salt) {
            return false;
        }

        if inner.current.salts.len() >= self.capacity_per_half
            || inner.current.opened_at.elapsed() >= self.max_age
        {
            let fresh = Half::new();
            let retiring = std::mem::replace(&mut inner.current, fresh);
            inner.previous = retiring;
        }

        inner.current.salts.insert(salt.to_vec());
        true
    }
}
