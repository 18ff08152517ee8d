// src/config/mod.rs
//! Service configuration: a TOML file for tunables, the environment for
//! secrets.

pub mod secrets;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::fetch::DEFAULT_FEED_BASE_URL;
use crate::ingest::normalize::{RuleCfg, RuleTable};
use crate::search::matcher::MatchConfig;
use crate::store::{DEFAULT_CHUNK_ITEMS, DEFAULT_VALUE_LIMIT};

pub use secrets::Secrets;

pub const ENV_CONFIG_PATH: &str = "VINYL_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/vinyl.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ingest: IngestCfg,
    pub sources: Vec<SourceCfg>,
    pub store: StoreCfg,
    pub search: SearchCfg,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestCfg {
    /// Scheduler period; 0 disables the background scheduler.
    pub interval_secs: u64,
    pub fetch_timeout_secs: u64,
    pub feed_base_url: String,
    pub run_on_start: bool,
}

impl Default for IngestCfg {
    fn default() -> Self {
        Self {
            interval_secs: 6 * 60 * 60,
            fetch_timeout_secs: 50,
            feed_base_url: DEFAULT_FEED_BASE_URL.to_string(),
            run_on_start: false,
        }
    }
}

impl IngestCfg {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

fn default_currency() -> String {
    "GBP".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceCfg {
    pub name: String,
    pub store_name: String,
    pub feed_id: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Replaces the source's built-in descriptor rules when present.
    #[serde(default)]
    pub rules: Option<Vec<RuleCfg>>,
    /// `rules` compiled once when the config is loaded.
    #[serde(skip)]
    compiled: Option<RuleTable>,
}

impl SourceCfg {
    fn new(name: &str, store_name: &str, feed_id: &str) -> Self {
        Self {
            name: name.to_string(),
            store_name: store_name.to_string(),
            feed_id: feed_id.to_string(),
            currency: default_currency(),
            enabled: true,
            rules: None,
            compiled: None,
        }
    }

    /// Store key holding this source's products.
    pub fn store_key(&self) -> String {
        format!("feed:{}", self.name)
    }

    pub fn rule_table(&self) -> Result<Option<RuleTable>> {
        self.rules
            .as_deref()
            .map(RuleTable::from_cfg)
            .transpose()
            .with_context(|| format!("source `{}` rules", self.name))
    }

    /// Table compiled at load time.
    pub fn compiled_rules(&self) -> Option<&RuleTable> {
        self.compiled.as_ref()
    }

    /// Rules handed to the normalizer: the load-time table, or a fresh
    /// compile for a source assembled outside of config loading.
    pub fn normalizer_rules(&self) -> Result<Option<RuleTable>> {
        match &self.compiled {
            Some(t) => Ok(Some(t.clone())),
            None => self.rule_table(),
        }
    }
}

/// The three Awin retailer feeds.
pub fn default_sources() -> Vec<SourceCfg> {
    vec![
        SourceCfg::new("emp", "EMP", "98984"),
        SourceCfg::new("popstore", "POP Store", "108054"),
        SourceCfg::new("vinylcastle", "VinylCastle", "43053"),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Upstash when its credentials are set, memory otherwise.
    #[default]
    Auto,
    Memory,
    Upstash,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreCfg {
    pub backend: BackendKind,
    pub chunk_items: usize,
    pub value_limit: usize,
}

impl Default for StoreCfg {
    fn default() -> Self {
        Self {
            backend: BackendKind::Auto,
            chunk_items: DEFAULT_CHUNK_ITEMS,
            value_limit: DEFAULT_VALUE_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchCfg {
    pub result_cap: usize,
    pub source_timeout_ms: u64,
    pub enrich_top_n: usize,
    pub enrich_timeout_ms: u64,
    pub feed_cache_ttl_secs: u64,
    pub currency: String,
    pub matching: MatchConfig,
}

impl Default for SearchCfg {
    fn default() -> Self {
        Self {
            result_cap: 60,
            source_timeout_ms: 8_000,
            enrich_top_n: 20,
            enrich_timeout_ms: 5_000,
            feed_cache_ttl_secs: 300,
            currency: default_currency(),
            matching: MatchConfig::default(),
        }
    }
}

impl SearchCfg {
    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }

    pub fn enrich_timeout(&self) -> Duration {
        Duration::from_millis(self.enrich_timeout_ms)
    }

    pub fn feed_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.feed_cache_ttl_secs)
    }
}

impl AppConfig {
    /// Parse TOML text, fill in default sources and validate.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: AppConfig = toml::from_str(s).context("parsing vinyl config")?;
        cfg.finish()?;
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// 1) $VINYL_CONFIG_PATH (must exist)
    /// 2) config/vinyl.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            return Self::load_from(&pb);
        }
        let fallback = PathBuf::from(DEFAULT_CONFIG_PATH);
        if fallback.exists() {
            return Self::load_from(&fallback);
        }
        let mut cfg = Self::default();
        cfg.finish()?;
        Ok(cfg)
    }

    fn finish(&mut self) -> Result<()> {
        if self.sources.is_empty() {
            self.sources = default_sources();
        }
        if self.store.chunk_items == 0 {
            self.store.chunk_items = DEFAULT_CHUNK_ITEMS;
        }
        if self.search.result_cap == 0 {
            bail!("search.result_cap must be positive");
        }

        let mut seen = HashSet::new();
        for s in &self.sources {
            if s.name.trim().is_empty() {
                bail!("source with empty name");
            }
            if !seen.insert(s.name.as_str()) {
                bail!("duplicate source `{}`", s.name);
            }
        }
        // compile now so a bad pattern fails at startup
        for s in &mut self.sources {
            s.compiled = s.rule_table()?;
        }
        Ok(())
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceCfg> {
        self.sources.iter().filter(|s| s.enabled)
    }

    pub fn source(&self, name: &str) -> Option<&SourceCfg> {
        self.sources.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = AppConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.sources.len(), 3);
        assert_eq!(cfg.source("emp").unwrap().feed_id, "98984");
        assert_eq!(cfg.store.chunk_items, 5000);
        assert_eq!(cfg.search.result_cap, 60);
        assert_eq!(cfg.search.feed_cache_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn sources_and_rules_parse() {
        let toml = r#"
            [ingest]
            interval_secs = 60

            [[sources]]
            name = "emp"
            store_name = "EMP"
            feed_id = "1"

            [[sources.rules]]
            name = "lp"
            pattern = '\blp\b'
            action = "truncate"
        "#;
        let cfg = AppConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.ingest.interval_secs, 60);
        assert_eq!(cfg.sources.len(), 1);
        let table = cfg.sources[0].compiled_rules().expect("compiled at load");
        assert_eq!(table.apply("Blue LP Edition"), "Blue");
        let handed = cfg.sources[0].normalizer_rules().unwrap().unwrap();
        assert_eq!(handed.apply("Blue LP Edition"), "Blue");
    }

    #[test]
    fn sources_without_rules_have_no_table() {
        let cfg = AppConfig::from_toml_str("").unwrap();
        assert!(cfg.sources.iter().all(|s| s.compiled_rules().is_none()));
        assert!(cfg.source("emp").unwrap().normalizer_rules().unwrap().is_none());
    }

    #[test]
    fn shipped_config_matches_defaults() {
        let p = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH);
        let cfg = AppConfig::load_from(&p).unwrap();
        let names: Vec<_> = cfg.sources.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["emp", "popstore", "vinylcastle"]);
        assert_eq!(cfg.ingest.interval_secs, IngestCfg::default().interval_secs);
        assert_eq!(cfg.ingest.fetch_timeout_secs, IngestCfg::default().fetch_timeout_secs);
        assert_eq!(cfg.ingest.fetch_timeout(), Duration::from_secs(50));
        assert_eq!(cfg.store.backend, BackendKind::Auto);
        assert!(cfg.search.matching.exclude_tributes);
    }

    #[test]
    fn bad_rule_and_duplicate_sources_fail() {
        let bad = r#"
            [[sources]]
            name = "emp"
            store_name = "EMP"
            feed_id = "1"
            rules = [{ name = "x", pattern = "(", action = "strip" }]
        "#;
        let err = AppConfig::from_toml_str(bad).unwrap_err();
        assert!(format!("{err:#}").contains("rule `x` regex error"));

        let dup = r#"
            [[sources]]
            name = "emp"
            store_name = "EMP"
            feed_id = "1"
            [[sources]]
            name = "emp"
            store_name = "EMP"
            feed_id = "2"
        "#;
        assert!(AppConfig::from_toml_str(dup).is_err());
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_CONFIG_PATH);

        // nothing on disk
        let cfg = AppConfig::load_default().unwrap();
        assert_eq!(cfg.sources.len(), 3);

        let p = tmp.path().join("custom.toml");
        fs::write(&p, "[search]\nresult_cap = 5\n").unwrap();
        env::set_var(ENV_CONFIG_PATH, p.display().to_string());
        assert_eq!(AppConfig::load_default().unwrap().search.result_cap, 5);

        env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml").display().to_string());
        assert!(AppConfig::load_default().is_err());

        env::remove_var(ENV_CONFIG_PATH);
        env::set_current_dir(&old).unwrap();
    }
}
