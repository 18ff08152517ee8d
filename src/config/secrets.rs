// src/config/secrets.rs
use std::env;

/// Credentials read from the environment. Blank values count as unset.
#[derive(Clone, Default)]
pub struct Secrets {
    pub awin_api_key: Option<String>,
    pub upstash_url: Option<String>,
    pub upstash_token: Option<String>,
    pub discogs_key: Option<String>,
    pub discogs_secret: Option<String>,
    pub ebay_client_id: Option<String>,
    pub ebay_client_secret: Option<String>,
    pub cron_secret: Option<String>,
}

fn var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Secrets {
    pub fn from_env() -> Self {
        Self {
            awin_api_key: var("AWIN_API_KEY"),
            upstash_url: var("UPSTASH_REDIS_REST_URL"),
            upstash_token: var("UPSTASH_REDIS_REST_TOKEN"),
            discogs_key: var("DISCOGS_CONSUMER_KEY"),
            discogs_secret: var("DISCOGS_CONSUMER_SECRET"),
            ebay_client_id: var("EBAY_CLIENT_ID"),
            ebay_client_secret: var("EBAY_CLIENT_SECRET"),
            cron_secret: var("CRON_SECRET"),
        }
    }

    pub fn upstash(&self) -> Option<(&str, &str)> {
        Some((self.upstash_url.as_deref()?, self.upstash_token.as_deref()?))
    }

    pub fn discogs(&self) -> Option<(&str, &str)> {
        Some((self.discogs_key.as_deref()?, self.discogs_secret.as_deref()?))
    }

    pub fn ebay(&self) -> Option<(&str, &str)> {
        Some((
            self.ebay_client_id.as_deref()?,
            self.ebay_client_secret.as_deref()?,
        ))
    }
}

// Never print credential values.
impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let set = |v: &Option<String>| if v.is_some() { "set" } else { "unset" };
        f.debug_struct("Secrets")
            .field("awin_api_key", &set(&self.awin_api_key))
            .field("upstash", &set(&self.upstash_token))
            .field("discogs", &set(&self.discogs_key))
            .field("ebay", &set(&self.ebay_client_id))
            .field("cron_secret", &set(&self.cron_secret))
            .finish()
    }
}
