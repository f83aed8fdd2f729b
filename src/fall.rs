// src/fall.rs
//
// Per-person down detection. A below-threshold aspect ratio opens an episode;
// the episode alerts once after the minimum down-duration and closes only
// when the person is upright again, so one continuous fall can never emit
// twice but a genuine recovery re-arms the alert.

use crate::cooldown::CooldownRegistry;
use crate::tracker::TrackedObject;
use crate::types::BBox;
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallState {
    Upright,
    Candidate,
    Alerted,
}

#[derive(Debug, Clone)]
struct FallEpisode {
    first_detected_at: f64,
    alerted: bool,
}

#[derive(Debug, Clone)]
pub struct FallIncident {
    pub person_id: u32,
    pub duration_s: f64,
    pub aspect_ratio: f32,
    pub person_confidence: f32,
    pub person_bbox: BBox,
}

pub struct FallDetector {
    aspect_ratio_threshold: f32,
    min_duration_s: f64,
    cooldown_s: f64,
    episodes: HashMap<u32, FallEpisode>,
}

impl FallDetector {
    pub fn new(aspect_ratio_threshold: f32, min_duration_s: f64, cooldown_s: f64) -> Self {
        Self {
            aspect_ratio_threshold,
            min_duration_s,
            cooldown_s,
            episodes: HashMap::new(),
        }
    }

    pub fn update(
        &mut self,
        people: &[TrackedObject],
        now: f64,
        cooldowns: &mut CooldownRegistry,
    ) -> Vec<FallIncident> {
        let mut incidents = Vec::new();

        for person in people {
            let ratio = person.bbox.aspect_ratio();

            if ratio < self.aspect_ratio_threshold {
                let episode = self.episodes.entry(person.id).or_insert_with(|| {
                    debug!(
                        "Person #{} down candidate (ratio {:.2})",
                        person.id, ratio
                    );
                    FallEpisode {
                        first_detected_at: now,
                        alerted: false,
                    }
                });

                if !episode.alerted && now - episode.first_detected_at >= self.min_duration_s {
                    // One transition per episode, whatever the cooldown says
                    episode.alerted = true;
                    let duration = now - episode.first_detected_at;

                    let key = format!("fall_{}", person.id);
                    if cooldowns.can_fire(&key, now, self.cooldown_s) {
                        incidents.push(FallIncident {
                            person_id: person.id,
                            duration_s: duration,
                            aspect_ratio: ratio,
                            person_confidence: person.confidence,
                            person_bbox: person.bbox,
                        });
                    } else {
                        debug!(
                            "Person #{} down {:.1}s but fall key is cooling down",
                            person.id, duration
                        );
                    }
                }
            } else if self.episodes.remove(&person.id).is_some() {
                info!("Person #{} back upright", person.id);
            }
        }

        incidents
    }

    pub fn state_of(&self, id: u32) -> FallState {
        match self.episodes.get(&id) {
            None => FallState::Upright,
            Some(episode) if episode.alerted => FallState::Alerted,
            Some(_) => FallState::Candidate,
        }
    }

    /// Identities currently past the alert transition, for renderer marking.
    pub fn down_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .episodes
            .iter()
            .filter(|(_, episode)| episode.alerted)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Drops the episode for an identity the tracker no longer knows.
    pub fn forget(&mut self, id: u32) {
        if self.episodes.remove(&id).is_some() {
            debug!("Dropped fall episode for dead track #{}", id);
        }
    }

    pub fn reset(&mut self) {
        self.episodes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(id: u32, ratio: f32) -> TrackedObject {
        // width 100 so the aspect ratio equals height/100
        TrackedObject {
            id,
            class: "person".to_string(),
            bbox: BBox {
                x: 50.0,
                y: 50.0,
                width: 100.0,
                height: ratio * 100.0,
            },
            confidence: 0.9,
            last_seen: 0.0,
        }
    }

    fn run(
        detector: &mut FallDetector,
        cooldowns: &mut CooldownRegistry,
        id: u32,
        ratio: f32,
        now: f64,
    ) -> Vec<FallIncident> {
        detector.update(&[person(id, ratio)], now, cooldowns)
    }

    #[test]
    fn test_one_alert_per_episode() {
        let mut detector = FallDetector::new(0.67, 1.5, 60.0);
        let mut cooldowns = CooldownRegistry::new();

        let mut fired = Vec::new();
        for step in 0..17 {
            let now = step as f64 * 0.1;
            fired.extend(run(&mut detector, &mut cooldowns, 1, 0.5, now));
        }

        assert_eq!(fired.len(), 1);
        assert!(fired[0].duration_s >= 1.5 && fired[0].duration_s <= 1.6);
        assert_eq!(fired[0].aspect_ratio, 0.5);
        assert_eq!(detector.state_of(1), FallState::Alerted);
    }

    #[test]
    fn test_short_dip_never_alerts() {
        let mut detector = FallDetector::new(0.67, 1.5, 60.0);
        let mut cooldowns = CooldownRegistry::new();

        assert!(run(&mut detector, &mut cooldowns, 1, 0.5, 0.0).is_empty());
        assert!(run(&mut detector, &mut cooldowns, 1, 0.5, 1.0).is_empty());
        assert!(run(&mut detector, &mut cooldowns, 1, 1.2, 1.2).is_empty());
        assert_eq!(detector.state_of(1), FallState::Upright);
    }

    #[test]
    fn test_recovery_rearms_alert() {
        let mut detector = FallDetector::new(0.67, 1.5, 1.0);
        let mut cooldowns = CooldownRegistry::new();

        assert!(run(&mut detector, &mut cooldowns, 1, 0.5, 0.0).is_empty());
        assert_eq!(run(&mut detector, &mut cooldowns, 1, 0.5, 1.5).len(), 1);

        // Upright clears the episode
        assert!(run(&mut detector, &mut cooldowns, 1, 1.1, 2.0).is_empty());
        assert_eq!(detector.state_of(1), FallState::Upright);

        // A fresh fall alerts again once its own duration is served
        assert!(run(&mut detector, &mut cooldowns, 1, 0.5, 3.0).is_empty());
        let second = run(&mut detector, &mut cooldowns, 1, 0.5, 4.5);
        assert_eq!(second.len(), 1);
        assert!((second[0].duration_s - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_cooldown_swallows_rapid_refall() {
        let mut detector = FallDetector::new(0.67, 1.5, 60.0);
        let mut cooldowns = CooldownRegistry::new();

        run(&mut detector, &mut cooldowns, 1, 0.5, 0.0);
        assert_eq!(run(&mut detector, &mut cooldowns, 1, 0.5, 1.5).len(), 1);
        run(&mut detector, &mut cooldowns, 1, 1.1, 2.0);

        // Second fall inside the 60s key window: episode latches, no emission
        run(&mut detector, &mut cooldowns, 1, 0.5, 2.5);
        assert!(run(&mut detector, &mut cooldowns, 1, 0.5, 4.0).is_empty());
        assert_eq!(detector.state_of(1), FallState::Alerted);
    }

    #[test]
    fn test_threshold_boundary_is_upright() {
        let mut detector = FallDetector::new(0.67, 1.5, 60.0);
        let mut cooldowns = CooldownRegistry::new();

        assert!(run(&mut detector, &mut cooldowns, 1, 0.67, 0.0).is_empty());
        assert_eq!(detector.state_of(1), FallState::Upright);
    }

    #[test]
    fn test_people_tracked_independently() {
        let mut detector = FallDetector::new(0.67, 1.5, 60.0);
        let mut cooldowns = CooldownRegistry::new();

        let frame = [person(1, 0.5), person(2, 1.4)];
        detector.update(&frame, 0.0, &mut cooldowns);
        let fired = detector.update(&frame, 1.5, &mut cooldowns);

        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].person_id, 1);
        assert_eq!(detector.down_ids(), vec![1]);
        assert_eq!(detector.state_of(2), FallState::Upright);
    }

    #[test]
    fn test_forget_drops_episode() {
        let mut detector = FallDetector::new(0.67, 1.5, 60.0);
        let mut cooldowns = CooldownRegistry::new();

        run(&mut detector, &mut cooldowns, 1, 0.5, 0.0);
        assert_eq!(detector.state_of(1), FallState::Candidate);
        detector.forget(1);
        assert_eq!(detector.state_of(1), FallState::Upright);
    }
}
