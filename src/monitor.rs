// src/monitor.rs
//
// One monitoring session over one camera feed. Owns every per-session
// piece: tracker, cooldowns, the three detectors, the alert emitter and
// the set of in-flight evidence tasks. Frames come in through
// process_frame; nothing in here blocks the frame loop except the roster
// fetch at reconciliation time.

use crate::alerts::AlertEmitter;
use crate::cooldown::CooldownRegistry;
use crate::evidence;
use crate::fall::FallDetector;
use crate::headcount::HeadcountReconciler;
use crate::proximity::{ClosePair, ProximityAnalyzer};
use crate::sink::{AlertStore, BlobStore, WorkerRegistry};
use crate::tracker::Tracker;
use crate::types::{AlertRecord, AlertType, BBox, Config, Detection, FrameImage};
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

// Floor for the cooldown prune age; the effective age is never shorter
// than the longest configured cooldown, so pruning cannot cut a window short
const COOLDOWN_PRUNE_FLOOR_S: f64 = 3600.0;

/// Shared handles to the configured sink, cloned into detached tasks.
#[derive(Clone)]
pub struct SinkHandles {
    pub alerts: Arc<dyn AlertStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub workers: Arc<dyn WorkerRegistry>,
}

/// One frame worth of upstream model output.
#[derive(Debug, Clone)]
pub struct FrameInput {
    /// Seconds on the caller's clock; drives every time-based rule
    pub timestamp: f64,
    pub detections: Vec<Detection>,
    /// RGB pixels for evidence snapshots, when the host has them
    pub frame: Option<FrameImage>,
}

/// What one frame produced, for rendering and stats.
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    pub alerts: Vec<AlertRecord>,
    pub close_pairs: Vec<ClosePair>,
    pub people_down: Vec<u32>,
    pub person_count: usize,
    pub vehicle_count: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStats {
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub proximity_alerts: u64,
    pub fall_alerts: u64,
    pub headcount_alerts: u64,
}

impl SessionStats {
    pub fn total_alerts(&self) -> u64 {
        self.proximity_alerts + self.fall_alerts + self.headcount_alerts
    }
}

pub struct SafetyMonitor {
    config: Config,
    tracker: Tracker,
    cooldowns: CooldownRegistry,
    proximity: ProximityAnalyzer,
    falls: FallDetector,
    headcount: HeadcountReconciler,
    emitter: AlertEmitter,
    sink: Option<SinkHandles>,
    tasks: JoinSet<()>,
    stats: SessionStats,
    cooldown_prune_age_s: f64,
}

impl SafetyMonitor {
    pub fn new(config: Config, sink: Option<SinkHandles>) -> Self {
        let tracker = Tracker::new(config.tracking.iou_threshold, config.tracking.max_age_s);
        let proximity =
            ProximityAnalyzer::new(config.proximity.threshold_px, config.proximity.cooldown_s);
        let falls = FallDetector::new(
            config.fall.aspect_ratio_threshold,
            config.fall.min_duration_s,
            config.fall.cooldown_s,
        );
        let headcount = HeadcountReconciler::new(
            config.headcount.window_minutes * 60.0,
            config.headcount.mismatch_tolerance,
            config.headcount.cooldown_s,
        );
        let emitter = AlertEmitter::new(config.alerts.clone());
        let cooldown_prune_age_s = COOLDOWN_PRUNE_FLOOR_S
            .max(config.proximity.cooldown_s)
            .max(config.fall.cooldown_s)
            .max(config.headcount.cooldown_s);

        if sink.is_none() {
            info!("No sink configured, running local-only (no headcount checks)");
        }

        Self {
            config,
            tracker,
            cooldowns: CooldownRegistry::new(),
            proximity,
            falls,
            headcount,
            emitter,
            sink,
            tasks: JoinSet::new(),
            stats: SessionStats::default(),
            cooldown_prune_age_s,
        }
    }

    /// Runs one frame through every detector. The only await that can
    /// take real time is the roster fetch, and only on frames where a
    /// headcount check is due.
    pub async fn process_frame(&mut self, input: FrameInput) -> FrameReport {
        if !self.frame_is_usable(&input) {
            self.stats.frames_skipped += 1;
            return FrameReport::default();
        }
        let now = input.timestamp;

        let (tracks, pruned) = self.tracker.update(&input.detections, now);
        for id in pruned {
            self.falls.forget(id);
        }

        let mut people = Vec::new();
        let mut vehicles = Vec::new();
        for track in tracks {
            if track.class == self.config.classes.person {
                people.push(track);
            } else if self.config.classes.vehicles.contains(&track.class) {
                vehicles.push(track);
            }
        }

        let proximity_incidents =
            self.proximity
                .scan(&people, &vehicles, now, &mut self.cooldowns);
        let fall_incidents = self.falls.update(&people, now, &mut self.cooldowns);

        self.headcount.record(people.len() as i64, now);
        let headcount_incident = if self.headcount.due(now) {
            let active = self.fetch_roster_count().await;
            let incident = self.headcount.tick(now, active, &mut self.cooldowns);
            self.cooldowns.prune(now, self.cooldown_prune_age_s);
            incident
        } else {
            None
        };

        let mut report = FrameReport {
            close_pairs: self.proximity.close_pairs().to_vec(),
            people_down: self.falls.down_ids(),
            person_count: people.len(),
            vehicle_count: vehicles.len(),
            ..FrameReport::default()
        };

        for incident in proximity_incidents {
            let title = format!("Worker too close to {}", incident.vehicle_type);
            let record = self.emitter.emit(
                AlertType::ProximityWarning,
                title,
                json!({
                    "vehicle_type": incident.vehicle_type,
                    "distance_px": incident.distance_px.round() as i64,
                    "person_confidence": incident.person_confidence,
                    "vehicle_confidence": incident.vehicle_confidence,
                }),
            );
            warn!(
                "🚨 {} ({}px, person #{} / vehicle #{})",
                record.title,
                incident.distance_px.round(),
                incident.person_id,
                incident.vehicle_id
            );
            self.stats.proximity_alerts += 1;
            self.spawn_evidence(
                record.clone(),
                input.frame.clone(),
                vec![incident.person_bbox, incident.vehicle_bbox],
            );
            report.alerts.push(record);
        }

        for incident in fall_incidents {
            let record = self.emitter.emit(
                AlertType::PersonDown,
                "Worker down",
                json!({
                    "duration_s": incident.duration_s,
                    "aspect_ratio": incident.aspect_ratio,
                    "person_confidence": incident.person_confidence,
                }),
            );
            warn!(
                "🚨 Worker down: person #{} horizontal for {:.1}s",
                incident.person_id, incident.duration_s
            );
            self.stats.fall_alerts += 1;
            self.spawn_evidence(
                record.clone(),
                input.frame.clone(),
                vec![incident.person_bbox],
            );
            report.alerts.push(record);
        }

        if let Some(incident) = headcount_incident {
            let record = self.emitter.emit(
                AlertType::HeadcountMismatch,
                "Headcount mismatch",
                json!({
                    "mode_count": incident.mode_count,
                    "current_count": incident.current_count,
                    "monitoring_interval_minutes": incident.interval_minutes,
                }),
            );
            warn!(
                "🚨 Headcount mismatch: typically seeing {} people lately",
                incident.mode_count
            );
            self.stats.headcount_alerts += 1;
            let highlights: Vec<BBox> = people.iter().map(|p| p.bbox).collect();
            self.spawn_evidence(record.clone(), input.frame.clone(), highlights);
            report.alerts.push(record);
        }

        self.stats.frames_processed += 1;
        report
    }

    /// Waits for all in-flight evidence tasks. For orderly shutdown.
    pub async fn drain(&mut self) {
        while self.tasks.join_next().await.is_some() {}
    }

    /// Drops in-flight evidence work and clears every piece of per-session
    /// state, returning the closed session's stats. The monitor starts the
    /// next session from zero.
    pub fn stop(&mut self) -> SessionStats {
        self.tasks.abort_all();
        self.tracker.reset();
        self.cooldowns.clear();
        self.proximity.reset();
        self.falls.reset();
        self.headcount.reset();
        self.emitter.reset();
        info!(
            "✅ Session closed: {} frames, {} alerts, {} skipped",
            self.stats.frames_processed,
            self.stats.total_alerts(),
            self.stats.frames_skipped
        );
        std::mem::take(&mut self.stats)
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    fn frame_is_usable(&self, input: &FrameInput) -> bool {
        if !input.timestamp.is_finite() {
            warn!("Skipping frame with unusable timestamp");
            return false;
        }
        for detection in &input.detections {
            if !detection.bbox.is_valid() || !(0.0..=1.0).contains(&detection.score) {
                warn!(
                    "Skipping frame at {:.2}s: malformed {} detection",
                    input.timestamp, detection.class
                );
                return false;
            }
        }
        true
    }

    async fn fetch_roster_count(&self) -> Option<i64> {
        let sink = self.sink.as_ref()?;
        match sink.workers.active_count().await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!("Roster fetch failed, skipping headcount check: {:#}", e);
                None
            }
        }
    }

    fn spawn_evidence(
        &mut self,
        record: AlertRecord,
        frame: Option<FrameImage>,
        highlights: Vec<BBox>,
    ) {
        let Some(sink) = &self.sink else {
            return;
        };
        self.tasks.spawn(evidence::persist_and_attach(
            sink.alerts.clone(),
            sink.blobs.clone(),
            record,
            frame,
            highlights,
            self.config.evidence.clone(),
        ));
    }
}
