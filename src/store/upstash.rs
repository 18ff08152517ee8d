// src/store/upstash.rs
//! Upstash Redis over its REST interface: each command is a JSON array POSTed
//! to the database URL with a bearer token.

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::KvBackend;
use crate::error::StoreError;

/// Upstash rejects requests above 1 MB; leave headroom for the envelope.
pub const UPSTASH_MAX_VALUE: usize = 1_000_000 - 4_096;

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Clone)]
pub struct UpstashBackend {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl UpstashBackend {
    pub fn new(url: &str, token: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("building upstash http client")?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// From `UPSTASH_REDIS_REST_URL` / `UPSTASH_REDIS_REST_TOKEN`.
    pub fn from_env() -> anyhow::Result<Self> {
        let url = std::env::var("UPSTASH_REDIS_REST_URL").context("UPSTASH_REDIS_REST_URL not set")?;
        let token =
            std::env::var("UPSTASH_REDIS_REST_TOKEN").context("UPSTASH_REDIS_REST_TOKEN not set")?;
        Self::new(&url, &token)
    }

    async fn command(&self, cmd: Value) -> Result<Value, StoreError> {
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&cmd)
            .send()
            .await
            .map_err(|e| StoreError::Backend(format!("upstash request: {e}")))?;

        let status = resp.status();
        let reply: Reply = resp
            .json()
            .await
            .map_err(|e| StoreError::Backend(format!("upstash reply (HTTP {status}): {e}")))?;
        if let Some(err) = reply.error {
            return Err(StoreError::Backend(format!("upstash: {err}")));
        }
        if !status.is_success() {
            return Err(StoreError::Backend(format!("upstash HTTP {status}")));
        }
        Ok(reply.result)
    }
}

#[async_trait]
impl KvBackend for UpstashBackend {
    fn max_value_bytes(&self) -> usize {
        UPSTASH_MAX_VALUE
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.command(json!(["GET", key])).await? {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s)),
            other => Ok(Some(other.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.command(json!(["SET", key, value])).await.map(|_| ())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.command(json!(["DEL", key])).await.map(|_| ())
    }
}
