use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub proximity: ProximityConfig,
    #[serde(default)]
    pub fall: FallConfig,
    #[serde(default)]
    pub headcount: HeadcountConfig,
    #[serde(default)]
    pub classes: ClassConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub evidence: EvidenceConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub sink: Option<SinkConfig>,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProximityConfig {
    /// Person-to-vehicle center distance at or under which a pair is close (pixels)
    #[serde(default = "default_proximity_threshold")]
    pub threshold_px: f32,
    #[serde(default = "default_proximity_cooldown")]
    pub cooldown_s: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallConfig {
    /// height/width under this value counts as lying down
    #[serde(default = "default_fall_ratio")]
    pub aspect_ratio_threshold: f32,
    #[serde(default = "default_fall_duration")]
    pub min_duration_s: f64,
    #[serde(default = "default_fall_cooldown")]
    pub cooldown_s: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadcountConfig {
    /// Sliding sample window; also the reconciliation interval
    #[serde(default = "default_headcount_window")]
    pub window_minutes: f64,
    #[serde(default = "default_headcount_tolerance")]
    pub mismatch_tolerance: i64,
    #[serde(default = "default_headcount_cooldown")]
    pub cooldown_s: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassConfig {
    #[serde(default = "default_person_class")]
    pub person: String,
    #[serde(default = "default_vehicle_classes")]
    pub vehicles: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    #[serde(default = "default_tracking_iou")]
    pub iou_threshold: f32,
    /// Tracks unseen for this long are dropped, along with their episodes
    #[serde(default = "default_tracking_max_age")]
    pub max_age_s: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceConfig {
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// When set, snapshots are also written to this directory
    #[serde(default)]
    pub local_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_alert_log_path")]
    pub log_path: String,
    #[serde(default = "default_proximity_severity")]
    pub proximity_severity: Severity,
    #[serde(default = "default_person_down_severity")]
    pub person_down_severity: Severity,
    #[serde(default = "default_headcount_severity")]
    pub headcount_severity: Severity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_sink_bucket")]
    pub bucket: String,
    #[serde(default = "default_sink_timeout")]
    pub timeout_s: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_scenario_path")]
    pub scenario: String,
    #[serde(default = "default_frame_width")]
    pub frame_width: u32,
    #[serde(default = "default_frame_height")]
    pub frame_height: u32,
    /// Pace replay to scenario timestamps instead of running flat out
    #[serde(default)]
    pub realtime: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_proximity_threshold() -> f32 {
    400.0
}

fn default_proximity_cooldown() -> f64 {
    10.0
}

fn default_fall_ratio() -> f32 {
    0.67
}

fn default_fall_duration() -> f64 {
    1.5
}

fn default_fall_cooldown() -> f64 {
    60.0
}

fn default_headcount_window() -> f64 {
    5.0
}

fn default_headcount_tolerance() -> i64 {
    1
}

fn default_headcount_cooldown() -> f64 {
    300.0
}

fn default_person_class() -> String {
    "person".to_string()
}

fn default_vehicle_classes() -> Vec<String> {
    ["car", "truck", "bus", "motorcycle", "bicycle"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_tracking_iou() -> f32 {
    0.3
}

fn default_tracking_max_age() -> f64 {
    2.0
}

fn default_jpeg_quality() -> u8 {
    80
}

fn default_alert_log_path() -> String {
    "alerts.jsonl".to_string()
}

fn default_proximity_severity() -> Severity {
    Severity::High
}

fn default_person_down_severity() -> Severity {
    Severity::Critical
}

fn default_headcount_severity() -> Severity {
    Severity::Medium
}

fn default_sink_bucket() -> String {
    "alert-snapshots".to_string()
}

fn default_sink_timeout() -> f64 {
    10.0
}

fn default_scenario_path() -> String {
    "scenario.jsonl".to_string()
}

fn default_frame_width() -> u32 {
    1280
}

fn default_frame_height() -> u32 {
    720
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            threshold_px: default_proximity_threshold(),
            cooldown_s: default_proximity_cooldown(),
        }
    }
}

impl Default for FallConfig {
    fn default() -> Self {
        Self {
            aspect_ratio_threshold: default_fall_ratio(),
            min_duration_s: default_fall_duration(),
            cooldown_s: default_fall_cooldown(),
        }
    }
}

impl Default for HeadcountConfig {
    fn default() -> Self {
        Self {
            window_minutes: default_headcount_window(),
            mismatch_tolerance: default_headcount_tolerance(),
            cooldown_s: default_headcount_cooldown(),
        }
    }
}

impl Default for ClassConfig {
    fn default() -> Self {
        Self {
            person: default_person_class(),
            vehicles: default_vehicle_classes(),
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            iou_threshold: default_tracking_iou(),
            max_age_s: default_tracking_max_age(),
        }
    }
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: default_jpeg_quality(),
            local_dir: None,
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            log_path: default_alert_log_path(),
            proximity_severity: default_proximity_severity(),
            person_down_severity: default_person_down_severity(),
            headcount_severity: default_headcount_severity(),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            scenario: default_scenario_path(),
            frame_width: default_frame_width(),
            frame_height: default_frame_height(),
            realtime: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Axis-aligned box in pixel space, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BBox {
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.height / self.width
    }

    pub fn is_valid(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.width > 0.0
            && self.height > 0.0
    }
}

/// One model output for one frame. Produced externally, read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    pub class: String,
    pub score: f32,
}

/// RGB8 pixels, row-major. Carried alongside detections so evidence capture
/// can snapshot the moment an alert fired.
#[derive(Debug, Clone)]
pub struct FrameImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertType {
    ProximityWarning,
    PersonDown,
    HeadcountMismatch,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::ProximityWarning => "ProximityWarning",
            AlertType::PersonDown => "PersonDown",
            AlertType::HeadcountMismatch => "HeadcountMismatch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

/// The unit handed to the alert store. `snapshot_url` is patched in later by
/// evidence capture; `acknowledged` belongs to the sink, not this core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub metadata: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub acknowledged: bool,
}

pub fn center_distance(a: &BBox, b: &BBox) -> f32 {
    let (ax, ay) = a.center();
    let (bx, by) = b.center();
    let dx = ax - bx;
    let dy = ay - by;
    (dx * dx + dy * dy).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BBox {
        BBox {
            x,
            y,
            width: w,
            height: h,
        }
    }

    #[test]
    fn test_distance_symmetric() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        let b = bbox(120.0, 50.0, 40.0, 80.0);
        assert_eq!(center_distance(&a, &b), center_distance(&b, &a));
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        let a = bbox(33.0, 7.0, 50.0, 90.0);
        assert_eq!(center_distance(&a, &a), 0.0);
    }

    #[test]
    fn test_distance_3_4_5() {
        // Centers at (5,5) and (35,45): sqrt(30^2 + 40^2) = 50
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        let b = bbox(30.0, 40.0, 10.0, 10.0);
        assert!((center_distance(&a, &b) - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_aspect_ratio() {
        let standing = bbox(0.0, 0.0, 40.0, 120.0);
        assert!((standing.aspect_ratio() - 3.0).abs() < 1e-6);

        let lying = bbox(0.0, 0.0, 120.0, 40.0);
        assert!(lying.aspect_ratio() < 0.67);
    }

    #[test]
    fn test_bbox_validity() {
        assert!(bbox(0.0, 0.0, 10.0, 10.0).is_valid());
        assert!(!bbox(0.0, 0.0, 0.0, 10.0).is_valid());
        assert!(!bbox(0.0, 0.0, -5.0, 10.0).is_valid());
        assert!(!bbox(f32::NAN, 0.0, 10.0, 10.0).is_valid());
        assert!(!bbox(0.0, 0.0, f32::INFINITY, 10.0).is_valid());
    }

    #[test]
    fn test_config_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.proximity.threshold_px, 400.0);
        assert_eq!(config.proximity.cooldown_s, 10.0);
        assert_eq!(config.fall.aspect_ratio_threshold, 0.67);
        assert_eq!(config.fall.min_duration_s, 1.5);
        assert_eq!(config.headcount.window_minutes, 5.0);
        assert_eq!(config.headcount.mismatch_tolerance, 1);
        assert!(config.classes.vehicles.contains(&"truck".to_string()));
        assert!(config.sink.is_none());
    }

    #[test]
    fn test_alert_record_wire_shape() {
        let record = AlertRecord {
            alert_type: AlertType::PersonDown,
            severity: Severity::Critical,
            title: "Worker down".to_string(),
            metadata: serde_json::json!({"duration_s": 1.6}),
            snapshot_url: None,
            created_at: Utc::now(),
            acknowledged: false,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "PersonDown");
        assert_eq!(json["severity"], "critical");
        assert!(json.get("snapshot_url").is_none());
        assert_eq!(json["acknowledged"], false);
    }
}
