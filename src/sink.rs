// src/sink.rs
//
// Outbound side of the pipeline: traits for the alert store, the snapshot
// blob store and the worker roster, plus the PostgREST-flavored HTTP client
// that implements all three against one endpoint. The monitor only ever
// talks to the traits, so tests swap in in-memory doubles.

use crate::types::{AlertRecord, SinkConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Inserts a record and returns the store's row id for later patching.
    async fn insert(&self, record: &AlertRecord) -> Result<i64>;
    async fn patch_snapshot(&self, id: i64, url: &str) -> Result<()>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Uploads bytes under `name` and returns a public URL for the object.
    async fn upload(&self, name: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;
}

#[async_trait]
pub trait WorkerRegistry: Send + Sync {
    /// Number of workers the roster currently marks as working.
    async fn active_count(&self) -> Result<i64>;
}

#[derive(Debug, Deserialize)]
struct InsertedRow {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct WorkerRow {
    #[allow(dead_code)]
    id: i64,
}

pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    bucket: String,
}

impl ApiClient {
    pub fn new(config: &SinkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(config.timeout_s))
            .build()
            .context("build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            bucket: config.bucket.clone(),
        })
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }
}

#[async_trait]
impl AlertStore for ApiClient {
    async fn insert(&self, record: &AlertRecord) -> Result<i64> {
        let url = format!("{}/rest/v1/alerts", self.base_url);
        let rows: Vec<InsertedRow> = self
            .authed(self.client.post(&url))
            .header("Prefer", "return=representation")
            .json(record)
            .send()
            .await
            .context("send alert insert")?
            .error_for_status()
            .context("alert insert rejected")?
            .json()
            .await
            .context("parse alert insert response")?;

        let row = rows.first().context("alert insert returned no rows")?;
        Ok(row.id)
    }

    async fn patch_snapshot(&self, id: i64, url: &str) -> Result<()> {
        let endpoint = format!("{}/rest/v1/alerts?id=eq.{}", self.base_url, id);
        self.authed(self.client.patch(&endpoint))
            .json(&serde_json::json!({ "snapshot_url": url }))
            .send()
            .await
            .context("send snapshot patch")?
            .error_for_status()
            .context("snapshot patch rejected")?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for ApiClient {
    async fn upload(&self, name: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        let endpoint = format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url, self.bucket, name
        );
        self.authed(self.client.post(&endpoint))
            .header("Content-Type", content_type)
            .body(bytes)
            .send()
            .await
            .context("send snapshot upload")?
            .error_for_status()
            .context("snapshot upload rejected")?;

        Ok(format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, name
        ))
    }
}

#[async_trait]
impl WorkerRegistry for ApiClient {
    async fn active_count(&self) -> Result<i64> {
        let endpoint = format!(
            "{}/rest/v1/workers?status=eq.Working&select=id",
            self.base_url
        );
        let rows: Vec<WorkerRow> = self
            .authed(self.client.get(&endpoint))
            .send()
            .await
            .context("fetch worker roster")?
            .error_for_status()
            .context("worker roster rejected")?
            .json()
            .await
            .context("parse worker roster")?;

        Ok(rows.len() as i64)
    }
}
