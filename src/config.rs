use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fetch::RetryPolicy;
use crate::history;
use crate::listing::parse_listing_url;
use crate::model::{Location, OwnerId, TrackedEntity};
use crate::notify::NotificationRule;

#[derive(Parser, Debug)]
#[command(version, about = "Tracks listing prices and notifies subscribers on changes")]
pub struct Args {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "pricewatch.toml")]
    pub config: PathBuf,

    /// Run a single tracking cycle and exit
    #[arg(long)]
    pub once: bool,

    /// Do not start the HTTP server
    #[arg(long)]
    pub no_server: bool,
}

fn default_interval() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Minutes between cycles, aligned to the wall clock
    #[serde(default = "default_interval")]
    pub interval_minutes: u64,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval(),
            fetch: FetchConfig::default(),
            proxy: ProxyConfig::default(),
            history: HistoryConfig::default(),
            server: ServerConfig::default(),
            subscriptions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    pub max_tries: u32,
    pub timeout_secs: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_tries: 3,
            timeout_secs: 25,
            backoff_base_ms: 500,
            backoff_max_ms: 8000,
        }
    }
}

impl FetchConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_tries: self.max_tries,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub list_path: PathBuf,
    pub shuffle: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            list_path: PathBuf::from("proxies.txt"),
            shuffle: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HistoryConfig {
    pub api_url: String,
    pub ttl_hours: u64,
    pub days: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            api_url: history::DEFAULT_API_URL.to_string(),
            ttl_hours: 12,
            days: history::DEFAULT_DAYS,
        }
    }
}

impl HistoryConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_hours.saturating_mul(60 * 60))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub enabled: bool,
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

/// A subscription as written in the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionConfig {
    pub owner: i64,
    pub url: String,
    /// Overrides the location implied by the URL's domain.
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub rule: NotificationRule,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl SubscriptionConfig {
    /// Classifies the URL into the entity, location and owner to register.
    pub fn resolve(&self) -> Result<(OwnerId, TrackedEntity, Location)> {
        let listing = parse_listing_url(&self.url)
            .with_context(|| format!("subscription for owner {}", self.owner))?;
        let location = self.location.unwrap_or(listing.location);
        Ok((OwnerId(self.owner), listing.to_entity(), location))
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_minutes == 0 {
            bail!("interval_minutes must be at least 1");
        }
        if self.fetch.max_tries == 0 {
            bail!("fetch.max_tries must be at least 1");
        }
        if self.fetch.backoff_max_ms < self.fetch.backoff_base_ms {
            bail!("fetch.backoff_max_ms must not be below fetch.backoff_base_ms");
        }
        url::Url::parse(&self.history.api_url)
            .with_context(|| format!("history.api_url '{}' is not a URL", self.history.api_url))?;
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityKind;

    #[test]
    fn empty_file_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.interval(), Duration::from_secs(600));
        assert_eq!(config.fetch.retry_policy().max_tries, 3);
        assert_eq!(config.history.ttl(), Duration::from_secs(12 * 3600));
        assert_eq!(config.history.api_url, history::DEFAULT_API_URL);
        assert!(!config.proxy.enabled);
        assert_eq!(config.server.bind, "0.0.0.0:8080");
    }

    #[test]
    fn parses_subscriptions() {
        let config: Config = toml::from_str(
            r#"
            interval_minutes = 5

            [fetch]
            max_tries = 5

            [[subscriptions]]
            owner = 42
            url = "https://geizhals.at/jabra-elite-85t-a2378831.html?hloc=de"
            rule = { below_threshold = 98.0 }

            [[subscriptions]]
            owner = 7
            url = "geizhals.de/?cat=WL-1156092"
            location = "at"
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.fetch.max_tries, 5);
        assert_eq!(config.fetch.timeout_secs, 25);

        let first = &config.subscriptions[0];
        assert_eq!(first.rule, NotificationRule::BelowThreshold(98.0));
        assert!(first.enabled);
        let (owner, entity, location) = first.resolve().unwrap();
        assert_eq!(owner, OwnerId(42));
        assert_eq!(entity.id, 2378831);
        assert_eq!(location, Location::At);

        let second = &config.subscriptions[1];
        assert_eq!(second.rule, NotificationRule::Always);
        assert!(!second.enabled);
        let (_, entity, location) = second.resolve().unwrap();
        assert_eq!(entity.kind, EntityKind::Wishlist);
        assert_eq!(location, Location::At);
    }

    #[test]
    fn rejects_bad_values() {
        let config: Config = toml::from_str("interval_minutes = 0").unwrap();
        assert!(config.validate().is_err());
        assert!(toml::from_str::<Config>("intervall = 3").is_err());

        let sub = SubscriptionConfig {
            owner: 1,
            url: "https://geizhals.fr/x-a1.html".into(),
            location: None,
            rule: NotificationRule::Always,
            enabled: true,
        };
        assert!(sub.resolve().is_err());
    }

    #[test]
    fn misspelled_keys_are_rejected() {
        let typo = r#"
            [[subscriptions]]
            owner = 1
            url = "https://geizhals.de/x-a1.html"
            rulee = { below_threshold = 5.0 }
        "#;
        assert!(toml::from_str::<Config>(typo).is_err());
        assert!(toml::from_str::<Config>("[fetch]\nmax_trys = 2").is_err());
    }

    #[test]
    fn huge_durations_saturate() {
        let config: Config = toml::from_str(&format!(
            "interval_minutes = {max}\n[history]\nttl_hours = {max}",
            max = i64::MAX
        ))
        .unwrap();
        assert_eq!(config.interval(), Duration::from_secs(u64::MAX));
        assert_eq!(config.history.ttl(), Duration::from_secs(u64::MAX));
    }
}
