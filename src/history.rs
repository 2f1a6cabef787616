//! Price history from the site's JSON API, with a per-entity freshness cache.

use serde::de::{Deserializer, Error as _};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::model::{EntityKey, EntityKind, HistoryPoint, Location, TrackedEntity};
use crate::parse::{WishlistItem, parse_wishlist_items};
use crate::site::SiteClient;

pub const DEFAULT_API_URL: &str = "https://geizhals.de/api/gh0/price_history";
pub const DEFAULT_TTL: Duration = Duration::from_secs(12 * 60 * 60);
pub const DEFAULT_DAYS: u32 = 9999;

#[derive(Debug, Serialize)]
struct HistoryRequest<'a> {
    id: Vec<u64>,
    itemcount: Vec<u64>,
    params: HistoryParams<'a>,
}

#[derive(Debug, Serialize)]
struct HistoryParams<'a> {
    days: u32,
    loc: &'a str,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    meta: HistoryMeta,
    #[serde(default)]
    response: Vec<WirePoint>,
}

/// Summary block the API sends along with the series.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryMeta {
    pub last_formatted: Option<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub current_best: Option<f64>,
    pub first_ts: Option<f64>,
    pub last_ts: Option<f64>,
}

/// A sample on the wire: `[timestampMillis, price, validFlag]`, where the
/// flag is a number (non-zero means valid).
#[derive(Debug, PartialEq)]
pub(crate) struct WirePoint(HistoryPoint);

impl<'de> Deserialize<'de> for WirePoint {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let (ts_millis, price, flag): (f64, f64, f64) = Deserialize::deserialize(d)?;
        let nanos = (ts_millis.round() as i128) * 1_000_000;
        let timestamp = OffsetDateTime::from_unix_timestamp_nanos(nanos).map_err(D::Error::custom)?;
        Ok(WirePoint(HistoryPoint {
            timestamp,
            price,
            valid: flag != 0.0,
        }))
    }
}

/// Price series of one entity at one location.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PriceHistory {
    pub entity: EntityKey,
    pub location: Location,
    pub meta: HistoryMeta,
    pub points: Vec<HistoryPoint>,
    #[serde(with = "time::serde::rfc3339")]
    pub downloaded_at: OffsetDateTime,
}

impl PriceHistory {
    /// The series as consumers should plot it: gaps take the last valid
    /// price, leading gaps without any earlier valid price are dropped and
    /// points before `since` only seed the carried price.
    pub fn carried_forward(&self, since: Option<OffsetDateTime>) -> Vec<(OffsetDateTime, f64)> {
        let mut out = Vec::with_capacity(self.points.len());
        let mut last_valid: Option<f64> = None;

        for p in &self.points {
            let price = if p.valid {
                last_valid = Some(p.price);
                p.price
            } else {
                match last_valid {
                    Some(carried) => carried,
                    None => continue,
                }
            };
            if since.is_some_and(|s| p.timestamp < s) {
                continue;
            }
            out.push((p.timestamp, price));
        }
        out
    }

    /// Lowest and highest valid price, if any.
    pub fn valid_range(&self) -> Option<(f64, f64)> {
        self.points
            .iter()
            .filter(|p| p.valid)
            .fold(None, |acc, p| match acc {
                None => Some((p.price, p.price)),
                Some((lo, hi)) => Some((lo.min(p.price), hi.max(p.price))),
            })
    }
}

/// Process-local cache of downloaded histories, fresh for `ttl`.
#[derive(Debug)]
pub struct HistoryCache {
    ttl: Duration,
    entries: Mutex<HashMap<(EntityKey, Location), (Instant, Arc<PriceHistory>)>>,
}

impl HistoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fresh entry or `None`. Stale entries are dropped on the way.
    pub fn get(&self, entity: EntityKey, location: Location) -> Option<Arc<PriceHistory>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(&(entity, location)) {
            Some((stored, history)) if stored.elapsed() < self.ttl => Some(history.clone()),
            Some(_) => {
                entries.remove(&(entity, location));
                None
            }
            None => None,
        }
    }

    /// Stores `history` and drops every entry that has gone stale.
    pub fn put(&self, history: Arc<PriceHistory>) {
        let key = (history.entity, history.location);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, (stored, _)| stored.elapsed() < self.ttl);
        entries.insert(key, (Instant::now(), history));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HistoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

pub struct PriceHistoryClient {
    fetcher: Arc<Fetcher>,
    site: Arc<SiteClient>,
    api_url: Url,
    days: u32,
    cache: HistoryCache,
}

impl PriceHistoryClient {
    pub fn new(fetcher: Arc<Fetcher>, site: Arc<SiteClient>, api_url: Url, cache: HistoryCache) -> Self {
        Self {
            fetcher,
            site,
            api_url,
            days: DEFAULT_DAYS,
            cache,
        }
    }

    pub fn with_days(mut self, days: u32) -> Self {
        self.days = days;
        self
    }

    pub fn cache(&self) -> &HistoryCache {
        &self.cache
    }

    /// History of `entity` at `location`, from cache when fresh.
    ///
    /// Products are requested alone with quantity 1. Wishlists are first
    /// downloaded to learn their products and quantities, then requested as
    /// one batch.
    pub async fn get_history(&self, entity: &TrackedEntity, location: Location) -> Result<Arc<PriceHistory>> {
        let key = entity.key();
        if let Some(history) = self.cache.get(key, location) {
            debug!(entity = %key, %location, "price history from cache");
            return Ok(history);
        }

        let items = match entity.kind {
            EntityKind::Product => vec![WishlistItem {
                id: entity.id,
                count: 1,
            }],
            EntityKind::Wishlist => {
                let page = self.site.fetch_page(entity, location).await?;
                let items = parse_wishlist_items(&page.body);
                if items.is_empty() {
                    return Err(Error::NoHistoryFound);
                }
                items
            }
        };

        info!(entity = %key, %location, products = items.len(), "downloading price history");
        let request = HistoryRequest {
            id: items.iter().map(|i| i.id).collect(),
            itemcount: items.iter().map(|i| i.count).collect(),
            params: HistoryParams {
                days: self.days,
                loc: location.code(),
            },
        };
        let page = self.fetcher.post_json(&self.api_url, &request).await?;
        let wire: HistoryResponse = serde_json::from_str(&page.body)?;
        if wire.response.is_empty() {
            return Err(Error::NoHistoryFound);
        }

        let history = Arc::new(PriceHistory {
            entity: key,
            location,
            meta: wire.meta,
            points: wire.response.into_iter().map(|w| w.0).collect(),
            downloaded_at: OffsetDateTime::now_utc(),
        });
        self.cache.put(history.clone());
        Ok(history)
    }
}
