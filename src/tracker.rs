use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dedup::FetchDedupCache;
use crate::model::{EntityKey, HistoryPoint, Location, Price, Subscription, TrackedEntity};
use crate::notify::{NotificationIntent, NotificationSink, evaluate};
use crate::site::{ObservedPrice, PriceSource};
use crate::stats::Stats;
use crate::store::PriceStore;

/// What one pass over the subscriptions did.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub subscriptions: usize,
    pub fetched: usize,
    pub dedup_hits: usize,
    pub failed: usize,
    pub changed: usize,
    pub notified: usize,
    pub cancelled: bool,
}

/// Anything the scheduler can run once per interval.
#[async_trait]
pub trait CycleRunner: Send + Sync {
    async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport>;
}

pub struct Tracker {
    store: Arc<dyn PriceStore>,
    source: Arc<dyn PriceSource>,
    sink: Arc<dyn NotificationSink>,
    stats: Arc<Stats>,
}

impl Tracker {
    pub fn new(
        store: Arc<dyn PriceStore>,
        source: Arc<dyn PriceSource>,
        sink: Arc<dyn NotificationSink>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            store,
            source,
            sink,
            stats,
        }
    }

    /// Compares an observation with the stored price and, on a strict
    /// change, persists it and notifies every subscriber of the listing.
    async fn apply(
        &self,
        sub: &Subscription,
        observed: &ObservedPrice,
        report: &mut CycleReport,
    ) -> Result<()> {
        let key = sub.entity.key();
        let location = sub.location;
        let current = self.store.current_price(key, location).await?;

        let old = match current {
            Some(p) if p.amount == observed.amount => return Ok(()),
            Some(p) => Some(p.amount),
            None => None,
        };

        let entity = TrackedEntity {
            display_name: observed.name.clone(),
            ..sub.entity.clone()
        };
        let now = OffsetDateTime::now_utc();
        let price = Price {
            entity: key,
            location,
            amount: observed.amount,
            currency: observed.currency,
            observed_at: now,
        };
        self.store.update_price(&entity, &price).await?;
        self.store
            .append_history(
                key,
                location,
                HistoryPoint {
                    timestamp: now,
                    price: observed.amount,
                    valid: true,
                },
            )
            .await?;

        let Some(old) = old else {
            info!(entity = %key, %location, price = observed.amount, "first price recorded");
            return Ok(());
        };

        report.changed += 1;
        info!(entity = %key, %location, old, new = observed.amount, "price changed");
        self.notify_all(key, location, &entity, old, observed, report)
            .await
    }

    async fn notify_all(
        &self,
        key: EntityKey,
        location: Location,
        entity: &TrackedEntity,
        old: f64,
        observed: &ObservedPrice,
        report: &mut CycleReport,
    ) -> Result<()> {
        for sub in self.store.subscriptions_for(key, location).await? {
            let Some(change) = evaluate(&sub.rule, old, observed.amount) else {
                debug!(subscription = sub.id.0, "rule did not match");
                continue;
            };
            let intent = NotificationIntent::new(&sub, entity.name_or_path(), change, observed.currency);
            match self.sink.deliver(&intent).await {
                Ok(()) => {
                    report.notified += 1;
                    self.stats.record_notification();
                }
                Err(e) => error!(subscription = sub.id.0, "notification failed: {e:#}"),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CycleRunner for Tracker {
    /// One sequential pass over all enabled subscriptions.
    ///
    /// Each (entity, location) is downloaded at most once. A listing that
    /// fails to download or parse is skipped for the rest of the cycle.
    async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport> {
        let subscriptions = self.store.enabled_subscriptions().await?;
        let mut report = CycleReport {
            subscriptions: subscriptions.len(),
            ..CycleReport::default()
        };
        let mut dedup = FetchDedupCache::new();
        let mut failed: HashSet<(EntityKey, Location)> = HashSet::new();

        for sub in &subscriptions {
            if cancel.is_cancelled() {
                warn!("cycle cancelled");
                report.cancelled = true;
                break;
            }
            let key = sub.entity.key();
            if failed.contains(&(key, sub.location)) {
                continue;
            }

            let observed = match dedup.get(key, sub.location) {
                Some(hit) => {
                    report.dedup_hits += 1;
                    hit.clone()
                }
                None => match self.source.fetch_price(&sub.entity, sub.location).await {
                    Ok(observed) => {
                        report.fetched += 1;
                        dedup.put(key, sub.location, observed.clone());
                        observed
                    }
                    Err(e) => {
                        warn!(entity = %key, location = %sub.location, "skipping listing: {e}");
                        report.failed += 1;
                        failed.insert((key, sub.location));
                        continue;
                    }
                },
            };

            self.apply(sub, &observed, &mut report).await?;
        }

        info!(
            subscriptions = report.subscriptions,
            fetched = report.fetched,
            dedup_hits = report.dedup_hits,
            failed = report.failed,
            changed = report.changed,
            notified = report.notified,
            "cycle finished"
        );
        Ok(report)
    }
}
