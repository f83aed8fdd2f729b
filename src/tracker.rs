// src/tracker.rs
//
// Persistent identity across frames. Detector state (cooldown keys, fall
// episodes) must never key on a detection's position in the frame array, so
// every detection is matched to a live track here and carries its id onward.

use crate::types::{BBox, Detection};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct TrackedObject {
    pub id: u32,
    pub class: String,
    pub bbox: BBox,
    pub confidence: f32,
    pub last_seen: f64,
}

pub struct Tracker {
    next_id: u32,
    tracks: HashMap<u32, TrackedObject>,
    iou_threshold: f32,
    max_age_s: f64,
}

impl Tracker {
    pub fn new(iou_threshold: f32, max_age_s: f64) -> Self {
        Self {
            next_id: 0,
            tracks: HashMap::new(),
            iou_threshold,
            max_age_s,
        }
    }

    /// Matches detections to live tracks (greedy best-IoU within the same
    /// class, each track claimed at most once), mints ids for the rest, then
    /// prunes tracks unseen for `max_age_s`. Returns the frame's tracked
    /// objects in detection order plus the ids that were pruned.
    pub fn update(&mut self, detections: &[Detection], now: f64) -> (Vec<TrackedObject>, Vec<u32>) {
        let mut current = Vec::with_capacity(detections.len());
        let mut claimed: Vec<u32> = Vec::new();

        for det in detections {
            let mut best_match: Option<(u32, f32)> = None;

            for (track_id, track) in &self.tracks {
                if track.class != det.class || claimed.contains(track_id) {
                    continue;
                }

                let overlap = iou(&track.bbox, &det.bbox);
                if overlap > self.iou_threshold {
                    match best_match {
                        Some((_, best)) if overlap <= best => {}
                        _ => best_match = Some((*track_id, overlap)),
                    }
                }
            }

            let id = match best_match {
                Some((track_id, _)) => {
                    if let Some(track) = self.tracks.get_mut(&track_id) {
                        track.bbox = det.bbox;
                        track.confidence = det.score;
                        track.last_seen = now;
                    }
                    track_id
                }
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    self.tracks.insert(
                        id,
                        TrackedObject {
                            id,
                            class: det.class.clone(),
                            bbox: det.bbox,
                            confidence: det.score,
                            last_seen: now,
                        },
                    );
                    debug!("New track #{} ({})", id, det.class);
                    id
                }
            };

            claimed.push(id);
            current.push(self.tracks[&id].clone());
        }

        let mut pruned = Vec::new();
        self.tracks.retain(|id, track| {
            let keep = now - track.last_seen <= self.max_age_s;
            if !keep {
                pruned.push(*id);
            }
            keep
        });
        if !pruned.is_empty() {
            debug!("Removed {} stale track(s)", pruned.len());
        }

        (current, pruned)
    }

    pub fn live_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn reset(&mut self) {
        self.tracks.clear();
        self.next_id = 0;
    }
}

fn iou(a: &BBox, b: &BBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let intersection = (x2 - x1) * (y2 - y1);
    let union = a.width * a.height + b.width * b.height - intersection;
    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}
