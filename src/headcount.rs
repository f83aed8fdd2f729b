// src/headcount.rs
//
// Rolling-window headcount reconciliation. Per-frame person counts are
// sampled into a sliding window; on each scheduled check the window mode
// is compared against the roster's currently active count and a mismatch
// beyond the tolerance raises an incident.

use crate::cooldown::CooldownRegistry;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
struct HeadcountSample {
    count: i64,
    at: f64,
}

#[derive(Debug, Clone)]
pub struct HeadcountIncident {
    pub mode_count: i64,
    pub current_count: i64,
    pub interval_minutes: f64,
}

pub struct HeadcountReconciler {
    window_s: f64,
    tolerance: i64,
    cooldown_s: f64,
    samples: VecDeque<HeadcountSample>,
    started_at: Option<f64>,
    last_check_at: Option<f64>,
}

impl HeadcountReconciler {
    pub fn new(window_s: f64, tolerance: i64, cooldown_s: f64) -> Self {
        Self {
            window_s,
            tolerance,
            cooldown_s,
            samples: VecDeque::new(),
            started_at: None,
            last_check_at: None,
        }
    }

    /// Appends one per-frame person count and drops samples older than the window.
    pub fn record(&mut self, count: i64, now: f64) {
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.samples.push_back(HeadcountSample { count, at: now });
        let horizon = now - self.window_s;
        while self.samples.front().map_or(false, |s| s.at < horizon) {
            self.samples.pop_front();
        }
    }

    /// A check is due one full window after sampling began, then once per window.
    pub fn due(&self, now: f64) -> bool {
        let Some(started) = self.started_at else {
            return false;
        };
        match self.last_check_at {
            None => now - started >= self.window_s,
            Some(last) => now - last >= self.window_s,
        }
    }

    /// Runs one reconciliation. `active` is the roster's current working
    /// count; `None` means the roster was unreachable and the check is
    /// skipped without losing its slot in the schedule.
    pub fn tick(
        &mut self,
        now: f64,
        active: Option<i64>,
        cooldowns: &mut CooldownRegistry,
    ) -> Option<HeadcountIncident> {
        self.last_check_at = Some(now);

        let Some(active) = active else {
            debug!("Headcount check skipped: no active roster count");
            return None;
        };
        let mode = self.mode()?;
        let current = self.samples.back().map(|s| s.count)?;

        debug!(
            "Headcount check: mode {} over {} samples, roster {}",
            mode,
            self.samples.len(),
            active
        );

        if (mode - active).abs() <= self.tolerance {
            return None;
        }
        if !cooldowns.can_fire("headcount_mismatch", now, self.cooldown_s) {
            return None;
        }

        info!(
            "👷 Headcount mismatch: seeing {} people, roster says {}",
            mode, active
        );
        Some(HeadcountIncident {
            mode_count: mode,
            current_count: current,
            interval_minutes: self.window_s / 60.0,
        })
    }

    /// Most frequent count in the window; ties go to the value seen last.
    pub fn mode(&self) -> Option<i64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut freq: HashMap<i64, usize> = HashMap::new();
        for sample in &self.samples {
            *freq.entry(sample.count).or_insert(0) += 1;
        }
        let mut best: Option<(i64, usize)> = None;
        for sample in &self.samples {
            let count = freq[&sample.count];
            if best.map_or(true, |(_, best_count)| count >= best_count) {
                best = Some((sample.count, count));
            }
        }
        best.map(|(value, _)| value)
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.started_at = None;
        self.last_check_at = None;
    }
}
