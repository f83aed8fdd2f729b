// src/cooldown.rs
//
// Shared alert dedup. Every detector asks here before firing; a key may fire
// at most once per cooldown window.

use std::collections::HashMap;
use tracing::debug;

pub struct CooldownRegistry {
    last_fired: HashMap<String, f64>,
}

impl CooldownRegistry {
    pub fn new() -> Self {
        Self {
            last_fired: HashMap::new(),
        }
    }

    /// Records `now` and returns true when `key` has no entry or its window
    /// has elapsed. A denied call leaves the stored timestamp untouched.
    pub fn can_fire(&mut self, key: &str, now: f64, cooldown_s: f64) -> bool {
        match self.last_fired.get(key) {
            Some(&last) if now - last <= cooldown_s => false,
            _ => {
                self.last_fired.insert(key.to_string(), now);
                true
            }
        }
    }

    /// Drops entries idle longer than `max_age_s`. The caller must pass a
    /// `max_age_s` at least as long as the longest cooldown it gates with,
    /// or an entry can vanish mid-window and let its key fire early.
    pub fn prune(&mut self, now: f64, max_age_s: f64) {
        let before = self.last_fired.len();
        self.last_fired.retain(|_, &mut last| now - last <= max_age_s);
        let removed = before - self.last_fired.len();
        if removed > 0 {
            debug!("Pruned {} idle cooldown entries", removed);
        }
    }

    pub fn clear(&mut self) {
        self.last_fired.clear();
    }

    pub fn len(&self) -> usize {
        self.last_fired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_fired.is_empty()
    }
}

impl Default for CooldownRegistry {
    fn default() -> Self {
        Self::new()
    }
}
