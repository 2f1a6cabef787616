use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::fetch::{FetchedPage, Fetcher};
use crate::model::{Currency, Location, TrackedEntity};
use crate::parse::parse_entity;

/// Freshly observed name and price of a listing.
#[derive(Clone, Debug, PartialEq)]
pub struct ObservedPrice {
    pub name: String,
    pub amount: f64,
    pub currency: Currency,
}

/// Where the tracker gets current prices from.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_price(&self, entity: &TrackedEntity, location: Location) -> Result<ObservedPrice>;
}

/// Reads listings from the live site.
pub struct SiteClient {
    fetcher: Arc<Fetcher>,
    origin_override: Option<Url>,
}

impl SiteClient {
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self {
            fetcher,
            origin_override: None,
        }
    }

    /// Sends every listing request to `origin` instead of the location's
    /// domain (mirrors, test servers).
    pub fn with_origin(mut self, origin: Url) -> Self {
        self.origin_override = Some(origin);
        self
    }

    pub fn listing_url(&self, entity: &TrackedEntity, location: Location) -> Result<Url> {
        let raw = match &self.origin_override {
            Some(origin) => format!(
                "{}/{}",
                origin.as_str().trim_end_matches('/'),
                entity.canonical_path
            ),
            None => entity.url(location),
        };
        Url::parse(&raw).map_err(|_| Error::InvalidUrl(raw))
    }

    pub async fn fetch_page(&self, entity: &TrackedEntity, location: Location) -> Result<FetchedPage> {
        let url = self.listing_url(entity, location)?;
        debug!(%url, entity = %entity.key(), "downloading listing");
        self.fetcher.get(&url).await
    }
}

#[async_trait]
impl PriceSource for SiteClient {
    async fn fetch_price(&self, entity: &TrackedEntity, location: Location) -> Result<ObservedPrice> {
        let page = self.fetch_page(entity, location).await?;
        let parsed = parse_entity(entity.kind, &page.body)?;
        Ok(ObservedPrice {
            name: parsed.name,
            amount: parsed.price,
            currency: parsed.currency,
        })
    }
}
