use crate::types::Config;
use anyhow::{ensure, Context, Result};
use std::fs;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("reading config file {}", path))?;
        let config: Config =
            serde_yaml::from_str(&contents).with_context(|| format!("parsing config {}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects unusable thresholds at startup so nothing fails per-frame later.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.proximity.threshold_px.is_finite() && self.proximity.threshold_px > 0.0,
            "proximity.threshold_px must be a positive number, got {}",
            self.proximity.threshold_px
        );
        ensure!(
            self.proximity.cooldown_s >= 0.0,
            "proximity.cooldown_s must not be negative, got {}",
            self.proximity.cooldown_s
        );
        ensure!(
            self.fall.aspect_ratio_threshold.is_finite() && self.fall.aspect_ratio_threshold > 0.0,
            "fall.aspect_ratio_threshold must be a positive number, got {}",
            self.fall.aspect_ratio_threshold
        );
        ensure!(
            self.fall.min_duration_s >= 0.0,
            "fall.min_duration_s must not be negative, got {}",
            self.fall.min_duration_s
        );
        ensure!(
            self.fall.cooldown_s >= 0.0,
            "fall.cooldown_s must not be negative, got {}",
            self.fall.cooldown_s
        );
        ensure!(
            self.headcount.window_minutes > 0.0,
            "headcount.window_minutes must be greater than zero, got {}",
            self.headcount.window_minutes
        );
        ensure!(
            self.headcount.mismatch_tolerance >= 0,
            "headcount.mismatch_tolerance must not be negative, got {}",
            self.headcount.mismatch_tolerance
        );
        ensure!(
            self.headcount.cooldown_s >= 0.0,
            "headcount.cooldown_s must not be negative, got {}",
            self.headcount.cooldown_s
        );
        ensure!(
            !self.classes.person.is_empty(),
            "classes.person must name a class label"
        );
        ensure!(
            !self.classes.vehicles.is_empty()
                && self.classes.vehicles.iter().all(|c| !c.is_empty()),
            "classes.vehicles must list at least one non-empty class label"
        );
        ensure!(
            self.tracking.iou_threshold > 0.0 && self.tracking.iou_threshold <= 1.0,
            "tracking.iou_threshold must be within (0, 1], got {}",
            self.tracking.iou_threshold
        );
        ensure!(
            self.tracking.max_age_s > 0.0,
            "tracking.max_age_s must be greater than zero, got {}",
            self.tracking.max_age_s
        );
        ensure!(
            (1..=100).contains(&self.evidence.jpeg_quality),
            "evidence.jpeg_quality must be within 1..=100, got {}",
            self.evidence.jpeg_quality
        );
        if let Some(sink) = &self.sink {
            ensure!(!sink.base_url.is_empty(), "sink.base_url must not be empty");
            ensure!(
                sink.timeout_s > 0.0,
                "sink.timeout_s must be greater than zero, got {}",
                sink.timeout_s
            );
        }
        Ok(())
    }
}
