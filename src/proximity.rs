// src/proximity.rs
//
// Person-to-vehicle distance scoring. Every close pair is kept for the
// renderer; firing is gated per pair through the cooldown registry.

use crate::cooldown::CooldownRegistry;
use crate::tracker::TrackedObject;
use crate::types::{center_distance, BBox};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ClosePair {
    pub person_id: u32,
    pub vehicle_id: u32,
    pub distance_px: f32,
    pub person_bbox: BBox,
    pub vehicle_bbox: BBox,
}

#[derive(Debug, Clone)]
pub struct ProximityIncident {
    pub person_id: u32,
    pub vehicle_id: u32,
    pub vehicle_type: String,
    pub distance_px: f32,
    pub person_confidence: f32,
    pub vehicle_confidence: f32,
    pub person_bbox: BBox,
    pub vehicle_bbox: BBox,
}

pub struct ProximityAnalyzer {
    threshold_px: f32,
    cooldown_s: f64,
    close_pairs: Vec<ClosePair>,
}

impl ProximityAnalyzer {
    pub fn new(threshold_px: f32, cooldown_s: f64) -> Self {
        Self {
            threshold_px,
            cooldown_s,
            close_pairs: Vec::new(),
        }
    }

    /// Scores every (person, vehicle) pair for the frame. Pairs at or under
    /// the threshold become close-pair candidates; each candidate fires
    /// independently, subject to its own cooldown key.
    pub fn scan(
        &mut self,
        people: &[TrackedObject],
        vehicles: &[TrackedObject],
        now: f64,
        cooldowns: &mut CooldownRegistry,
    ) -> Vec<ProximityIncident> {
        self.close_pairs.clear();
        let mut incidents = Vec::new();

        for person in people {
            for vehicle in vehicles {
                let distance = center_distance(&person.bbox, &vehicle.bbox);
                if distance > self.threshold_px {
                    continue;
                }

                self.close_pairs.push(ClosePair {
                    person_id: person.id,
                    vehicle_id: vehicle.id,
                    distance_px: distance,
                    person_bbox: person.bbox,
                    vehicle_bbox: vehicle.bbox,
                });

                let key = format!("proximity_{}_{}", person.id, vehicle.id);
                if cooldowns.can_fire(&key, now, self.cooldown_s) {
                    incidents.push(ProximityIncident {
                        person_id: person.id,
                        vehicle_id: vehicle.id,
                        vehicle_type: vehicle.class.clone(),
                        distance_px: distance,
                        person_confidence: person.confidence,
                        vehicle_confidence: vehicle.confidence,
                        person_bbox: person.bbox,
                        vehicle_bbox: vehicle.bbox,
                    });
                }
            }
        }

        if !self.close_pairs.is_empty() {
            debug!(
                "{} close pair(s) this frame, {} past cooldown",
                self.close_pairs.len(),
                incidents.len()
            );
        }

        incidents
    }

    /// The current frame's candidates, for overlay drawing by the host.
    pub fn close_pairs(&self) -> &[ClosePair] {
        &self.close_pairs
    }

    pub fn reset(&mut self) {
        self.close_pairs.clear();
    }
}
