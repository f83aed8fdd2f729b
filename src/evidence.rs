// src/evidence.rs
//
// Evidence capture for fired alerts: store the record, render the frame
// with the involved boxes highlighted, upload the JPEG and patch its URL
// back onto the stored row. Every step can fail on its own; a failure is
// logged and the alert simply keeps whatever evidence made it through.

use crate::sink::{AlertStore, BlobStore};
use crate::types::{AlertRecord, BBox, EvidenceConfig, FrameImage};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::rect::Rect;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const HIGHLIGHT_COLOR: Rgb<u8> = Rgb([255, 64, 32]);

/// Unique object name for one snapshot, millisecond timestamp first so
/// bucket listings sort chronologically.
pub fn snapshot_name() -> String {
    format!("{}_{}.jpg", chrono::Utc::now().timestamp_millis(), Uuid::new_v4())
}

/// Renders the frame with hollow rectangles around the involved objects
/// and encodes it as JPEG. Boxes reaching outside the frame are clipped.
pub fn compose_snapshot(frame: &FrameImage, highlights: &[BBox], quality: u8) -> Result<Vec<u8>> {
    let mut img: RgbImage =
        RgbImage::from_raw(frame.width, frame.height, frame.data.clone())
            .context("pixel buffer does not match frame dimensions")?;

    for bbox in highlights {
        let rect = Rect::at(bbox.x.round() as i32, bbox.y.round() as i32).of_size(
            bbox.width.round().max(1.0) as u32,
            bbox.height.round().max(1.0) as u32,
        );
        imageproc::drawing::draw_hollow_rect_mut(&mut img, rect, HIGHLIGHT_COLOR);
    }

    encode_jpeg(&img, quality)
}

/// Fire-and-forget persistence chain for one alert. Runs detached from the
/// frame loop; each step logs its own failure and the chain stops at the
/// first one that leaves nothing to continue with.
pub async fn persist_and_attach(
    alerts: Arc<dyn AlertStore>,
    blobs: Arc<dyn BlobStore>,
    record: AlertRecord,
    frame: Option<FrameImage>,
    highlights: Vec<BBox>,
    config: EvidenceConfig,
) {
    let id = match alerts.insert(&record).await {
        Ok(id) => id,
        Err(e) => {
            error!(
                "Failed to store {} alert: {:#}",
                record.alert_type.as_str(),
                e
            );
            return;
        }
    };
    debug!("Stored {} alert as row {}", record.alert_type.as_str(), id);

    let Some(frame) = frame else {
        debug!("No frame pixels for alert {}, skipping snapshot", id);
        return;
    };

    let jpeg = match compose_snapshot(&frame, &highlights, config.jpeg_quality) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Snapshot compose failed for alert {}: {:#}", id, e);
            return;
        }
    };

    let name = snapshot_name();

    if let Some(dir) = &config.local_dir {
        if let Err(e) = save_local_copy(dir, &name, &jpeg) {
            warn!("Failed to keep local snapshot copy: {:#}", e);
        }
    }

    let url = match blobs.upload(&name, jpeg, "image/jpeg").await {
        Ok(url) => url,
        Err(e) => {
            warn!("Snapshot upload failed for alert {}: {:#}", id, e);
            return;
        }
    };

    if let Err(e) = alerts.patch_snapshot(id, &url).await {
        warn!("Failed to attach snapshot to alert {}: {:#}", id, e);
        return;
    }
    info!("📸 Snapshot attached to alert {}: {}", id, url);
}

fn save_local_copy(dir: &str, name: &str, bytes: &[u8]) -> Result<()> {
    std::fs::create_dir_all(dir).context("create snapshot dir")?;
    std::fs::write(std::path::Path::new(dir).join(name), bytes).context("write snapshot")?;
    Ok(())
}

/// Encode an RGB image to JPEG bytes using the `image` crate.
fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    use std::io::Cursor;

    let mut buf = Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
    img.write_with_encoder(encoder).context("JPEG encode")?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{AlertStore, BlobStore};
    use crate::types::{AlertType, Severity};
    use anyhow::bail;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BBox {
        BBox {
            x,
            y,
            width: w,
            height: h,
        }
    }

    fn record() -> AlertRecord {
        AlertRecord {
            alert_type: AlertType::PersonDown,
            severity: Severity::Critical,
            title: "Worker down".to_string(),
            metadata: serde_json::json!({}),
            snapshot_url: None,
            created_at: Utc::now(),
            acknowledged: false,
        }
    }

    #[derive(Default)]
    struct StoreDouble {
        fail_insert: bool,
        inserted: Mutex<Vec<AlertRecord>>,
        patched: Mutex<Vec<(i64, String)>>,
    }

    #[async_trait]
    impl AlertStore for StoreDouble {
        async fn insert(&self, record: &AlertRecord) -> Result<i64> {
            if self.fail_insert {
                bail!("store down");
            }
            let mut inserted = self.inserted.lock().unwrap();
            inserted.push(record.clone());
            Ok(inserted.len() as i64)
        }

        async fn patch_snapshot(&self, id: i64, url: &str) -> Result<()> {
            self.patched.lock().unwrap().push((id, url.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct BlobDouble {
        fail: bool,
        uploads: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BlobStore for BlobDouble {
        async fn upload(&self, name: &str, _bytes: Vec<u8>, _content_type: &str) -> Result<String> {
            if self.fail {
                bail!("bucket down");
            }
            self.uploads.lock().unwrap().push(name.to_string());
            Ok(format!("https://blob.test/{}", name))
        }
    }

    fn gray_frame(width: u32, height: u32) -> FrameImage {
        FrameImage {
            width,
            height,
            data: vec![128; (width * height * 3) as usize],
        }
    }

    #[test]
    fn test_snapshot_names_are_unique_jpgs() {
        let a = snapshot_name();
        let b = snapshot_name();
        assert_ne!(a, b);
        assert!(a.ends_with(".jpg"));

        let (millis, _) = a.split_once('_').unwrap();
        assert!(millis.parse::<i64>().unwrap() > 0);
    }

    #[test]
    fn test_compose_emits_jpeg_bytes() {
        let frame = gray_frame(64, 48);
        let bytes = compose_snapshot(&frame, &[bbox(10.0, 10.0, 20.0, 15.0)], 80).unwrap();
        // JPEG start-of-image marker
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_out_of_frame_highlight_is_clipped() {
        let frame = gray_frame(64, 48);
        let result = compose_snapshot(&frame, &[bbox(-10.0, -10.0, 200.0, 200.0)], 80);
        assert!(result.is_ok());
    }

    #[test]
    fn test_truncated_pixels_rejected() {
        let frame = FrameImage {
            width: 10,
            height: 10,
            data: vec![0; 5],
        };
        assert!(compose_snapshot(&frame, &[], 80).is_err());
    }

    #[test]
    fn test_local_copy_lands_in_dir() {
        let dir = tempfile::tempdir().unwrap();
        let dir_str = dir.path().to_string_lossy().into_owned();
        save_local_copy(&dir_str, "snap.jpg", &[1, 2, 3]).unwrap();
        assert_eq!(std::fs::read(dir.path().join("snap.jpg")).unwrap(), [1, 2, 3]);
    }

    #[tokio::test]
    async fn test_full_chain_patches_url() {
        let store = Arc::new(StoreDouble::default());
        let blobs = Arc::new(BlobDouble::default());

        persist_and_attach(
            store.clone(),
            blobs.clone(),
            record(),
            Some(gray_frame(32, 32)),
            vec![bbox(4.0, 4.0, 8.0, 8.0)],
            EvidenceConfig::default(),
        )
        .await;

        assert_eq!(store.inserted.lock().unwrap().len(), 1);
        assert_eq!(blobs.uploads.lock().unwrap().len(), 1);
        let patched = store.patched.lock().unwrap();
        assert_eq!(patched.len(), 1);
        assert_eq!(patched[0].0, 1);
        assert!(patched[0].1.starts_with("https://blob.test/"));
    }

    #[tokio::test]
    async fn test_insert_failure_stops_chain() {
        let store = Arc::new(StoreDouble {
            fail_insert: true,
            ..StoreDouble::default()
        });
        let blobs = Arc::new(BlobDouble::default());

        persist_and_attach(
            store.clone(),
            blobs.clone(),
            record(),
            Some(gray_frame(32, 32)),
            vec![],
            EvidenceConfig::default(),
        )
        .await;

        assert!(blobs.uploads.lock().unwrap().is_empty());
        assert!(store.patched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_failure_leaves_alert_standing() {
        let store = Arc::new(StoreDouble::default());
        let blobs = Arc::new(BlobDouble {
            fail: true,
            ..BlobDouble::default()
        });

        persist_and_attach(
            store.clone(),
            blobs.clone(),
            record(),
            Some(gray_frame(32, 32)),
            vec![],
            EvidenceConfig::default(),
        )
        .await;

        assert_eq!(store.inserted.lock().unwrap().len(), 1);
        assert!(store.patched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_frame_stores_bare_alert() {
        let store = Arc::new(StoreDouble::default());
        let blobs = Arc::new(BlobDouble::default());

        persist_and_attach(
            store.clone(),
            blobs.clone(),
            record(),
            None,
            vec![],
            EvidenceConfig::default(),
        )
        .await;

        assert_eq!(store.inserted.lock().unwrap().len(), 1);
        assert!(blobs.uploads.lock().unwrap().is_empty());
    }
}
