// src/main.rs

mod alerts;
mod config;
mod cooldown;
mod evidence;
mod fall;
mod headcount;
mod monitor;
mod proximity;
mod sink;
mod tracker;
mod types;

use anyhow::{Context, Result};
use monitor::{FrameInput, SafetyMonitor, SessionStats, SinkHandles};
use serde::Deserialize;
use sink::ApiClient;
use std::io::BufRead;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use types::{Config, Detection, FrameImage};

/// One line of a scenario file: a timestamped detection batch.
#[derive(Debug, Deserialize)]
struct ScenarioFrame {
    t: f64,
    detections: Vec<Detection>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = Config::load(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("siteguard={}", config.logging.level))),
        )
        .init();

    info!("🏗️ Site safety monitor starting (config: {})", config_path);

    let sink = match &config.sink {
        Some(sink_config) => {
            let client = Arc::new(ApiClient::new(sink_config)?);
            info!("Sink configured at {}", sink_config.base_url);
            Some(SinkHandles {
                alerts: client.clone(),
                blobs: client.clone(),
                workers: client,
            })
        }
        None => None,
    };

    let scenario_path = config.input.scenario.clone();
    let mut monitor = SafetyMonitor::new(config.clone(), sink);

    let stats = replay_scenario(&mut monitor, &config, &scenario_path).await?;

    monitor.drain().await;
    monitor.stop();

    info!("📊 Replay complete:");
    info!("   Frames processed: {}", stats.frames_processed);
    info!("   Frames skipped:   {}", stats.frames_skipped);
    info!("   Proximity alerts: {}", stats.proximity_alerts);
    info!("   Fall alerts:      {}", stats.fall_alerts);
    info!("   Headcount alerts: {}", stats.headcount_alerts);

    Ok(())
}

/// Feeds a JSONL scenario through the monitor line by line. Bad lines are
/// reported and skipped; the replay never stops for them.
async fn replay_scenario(
    monitor: &mut SafetyMonitor,
    config: &Config,
    path: &str,
) -> Result<SessionStats> {
    let file = std::fs::File::open(path).with_context(|| format!("open scenario {}", path))?;
    let reader = std::io::BufReader::new(file);

    let canvas = blank_canvas(config.input.frame_width, config.input.frame_height);
    let mut last_t: Option<f64> = None;
    let mut line_no = 0usize;

    for line in reader.lines() {
        line_no += 1;
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: ScenarioFrame = match serde_json::from_str(&line) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Skipping scenario line {}: {}", line_no, e);
                continue;
            }
        };

        if config.input.realtime {
            if let Some(last) = last_t {
                let gap = parsed.t - last;
                if gap > 0.0 {
                    tokio::time::sleep(std::time::Duration::from_secs_f64(gap)).await;
                }
            }
        }
        last_t = Some(parsed.t);

        let report = monitor
            .process_frame(FrameInput {
                timestamp: parsed.t,
                detections: parsed.detections,
                frame: Some(canvas.clone()),
            })
            .await;

        if line_no % 100 == 0 {
            info!(
                "Frame {}: {} people, {} vehicles, {} close pairs",
                line_no,
                report.person_count,
                report.vehicle_count,
                report.close_pairs.len()
            );
        }
    }

    Ok(monitor.stats())
}

/// Flat gray stand-in frame so replayed alerts still get a snapshot.
fn blank_canvas(width: u32, height: u32) -> FrameImage {
    FrameImage {
        width,
        height,
        data: vec![96; (width as usize) * (height as usize) * 3],
    }
}
