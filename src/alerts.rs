// src/alerts.rs
//
// Turns detector incidents into alert records: stamps severity and creation
// time, keeps a short in-memory tail for inspection, and appends every
// record to a local JSONL log so alerts survive even with no sink configured.

use crate::types::{AlertRecord, AlertType, AlertsConfig, Severity};
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use tracing::warn;

const RECENT_CAPACITY: usize = 100;

pub struct AlertEmitter {
    config: AlertsConfig,
    recent: VecDeque<AlertRecord>,
}

impl AlertEmitter {
    pub fn new(config: AlertsConfig) -> Self {
        Self {
            config,
            recent: VecDeque::with_capacity(RECENT_CAPACITY),
        }
    }

    /// Builds and logs a record. Log-file trouble is reported but never
    /// blocks the alert itself.
    pub fn emit(
        &mut self,
        alert_type: AlertType,
        title: impl Into<String>,
        metadata: serde_json::Value,
    ) -> AlertRecord {
        let record = AlertRecord {
            alert_type,
            severity: self.severity_for(alert_type),
            title: title.into(),
            metadata,
            snapshot_url: None,
            created_at: Utc::now(),
            acknowledged: false,
        };

        if let Err(e) = self.append_to_log(&record) {
            warn!("Failed to write alert log {}: {:#}", self.config.log_path, e);
        }

        if self.recent.len() == RECENT_CAPACITY {
            self.recent.pop_front();
        }
        self.recent.push_back(record.clone());

        record
    }

    pub fn severity_for(&self, alert_type: AlertType) -> Severity {
        match alert_type {
            AlertType::ProximityWarning => self.config.proximity_severity,
            AlertType::PersonDown => self.config.person_down_severity,
            AlertType::HeadcountMismatch => self.config.headcount_severity,
        }
    }

    pub fn recent(&self) -> impl Iterator<Item = &AlertRecord> {
        self.recent.iter()
    }

    pub fn reset(&mut self) {
        self.recent.clear();
    }

    fn append_to_log(&self, record: &AlertRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.log_path)
            .context("open alert log")?;
        let line = serde_json::to_string(record).context("serialize alert")?;
        writeln!(file, "{}", line)?;
        file.flush()?;
        Ok(())
    }
}
