// src/catalog/token.rs
//! OAuth client-credentials token cache.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use metrics::counter;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Cached token, exchanged anew once within `margin` of expiry.
    async fn token(&self) -> anyhow::Result<String>;
    /// Unconditional exchange, e.g. after the API answered 401.
    async fn refresh(&self) -> anyhow::Result<String>;
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenReply {
    access_token: String,
    expires_in: u64,
}

/// Exchanges client id/secret at `token_url` and caches the bearer token.
/// Concurrent callers share one exchange through the mutex.
pub struct ClientCredentialsTokens {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: Option<String>,
    margin: Duration,
    cached: Mutex<Option<CachedToken>>,
}

pub const DEFAULT_MARGIN: Duration = Duration::from_secs(300);

impl ClientCredentialsTokens {
    pub fn new(http: reqwest::Client, token_url: &str, client_id: &str, client_secret: &str) -> Self {
        Self {
            http,
            token_url: token_url.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            scope: None,
            margin: DEFAULT_MARGIN,
            cached: Mutex::new(None),
        }
    }

    pub fn with_scope(mut self, scope: &str) -> Self {
        self.scope = Some(scope.to_string());
        self
    }

    pub fn with_margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    async fn exchange(&self) -> anyhow::Result<CachedToken> {
        let mut form = vec![("grant_type", "client_credentials")];
        if let Some(scope) = self.scope.as_deref() {
            form.push(("scope", scope));
        }
        let started = Instant::now();
        let resp = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&form)
            .send()
            .await
            .context("token request")?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("token endpoint returned HTTP {}", status.as_u16()));
        }
        let reply: TokenReply = resp.json().await.context("token reply")?;
        counter!("catalog_token_refresh_total").increment(1);
        tracing::debug!(target: "catalog", expires_in = reply.expires_in, "token exchanged");
        Ok(CachedToken {
            value: reply.access_token,
            expires_at: started + Duration::from_secs(reply.expires_in),
        })
    }
}

#[async_trait]
impl TokenProvider for ClientCredentialsTokens {
    async fn token(&self) -> anyhow::Result<String> {
        let mut guard = self.cached.lock().await;
        if let Some(t) = guard.as_ref() {
            if Instant::now() + self.margin < t.expires_at {
                return Ok(t.value.clone());
            }
        }
        let fresh = self.exchange().await?;
        let value = fresh.value.clone();
        *guard = Some(fresh);
        Ok(value)
    }

    async fn refresh(&self) -> anyhow::Result<String> {
        let mut guard = self.cached.lock().await;
        *guard = None;
        let fresh = self.exchange().await?;
        let value = fresh.value.clone();
        *guard = Some(fresh);
        Ok(value)
    }
}

/// Send a bearer-authenticated request built by `build`; on 401 force one
/// token refresh and send once more.
pub async fn send_with_retry<F>(tokens: &dyn TokenProvider, build: F) -> anyhow::Result<reqwest::Response>
where
    F: Fn(&str) -> reqwest::RequestBuilder,
{
    let token = tokens.token().await?;
    let resp = build(&token).send().await.context("authorized request")?;
    if resp.status() != reqwest::StatusCode::UNAUTHORIZED {
        return Ok(resp);
    }
    tracing::info!(target: "catalog", "401 from API, refreshing token once");
    let token = tokens.refresh().await?;
    build(&token).send().await.context("authorized request retry")
}
