use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::model::{
    EntityKey, HistoryPoint, Location, OwnerId, Price, Subscription, SubscriptionId, TrackedEntity,
};
use crate::notify::NotificationRule;

/// Storage the tracking cycle reads subscriptions from and writes prices to.
#[async_trait]
pub trait PriceStore: Send + Sync {
    /// All enabled subscriptions, entity names as last stored.
    async fn enabled_subscriptions(&self) -> Result<Vec<Subscription>>;

    /// Enabled subscriptions on one (entity, location), for fan-out after a change.
    async fn subscriptions_for(&self, entity: EntityKey, location: Location) -> Result<Vec<Subscription>>;

    async fn current_price(&self, entity: EntityKey, location: Location) -> Result<Option<Price>>;

    /// Stores the new price and refreshes the entity's display name.
    async fn update_price(&self, entity: &TrackedEntity, price: &Price) -> Result<()>;

    /// Appends a point unless it repeats the last stored price. Returns
    /// whether a point was written.
    async fn append_history(&self, entity: EntityKey, location: Location, point: HistoryPoint) -> Result<bool>;
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    subscriptions: Vec<Subscription>,
    entities: HashMap<EntityKey, TrackedEntity>,
    prices: HashMap<(EntityKey, Location), Price>,
    history: HashMap<(EntityKey, Location), Vec<HistoryPoint>>,
}

/// In-process store, seeded from configuration. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a subscription. An owner can hold one enabled subscription
    /// per (entity, location).
    pub fn subscribe(
        &self,
        owner: OwnerId,
        entity: TrackedEntity,
        location: Location,
        rule: NotificationRule,
    ) -> Result<SubscriptionId> {
        let mut inner = self.lock();
        let key = entity.key();
        if inner
            .subscriptions
            .iter()
            .any(|s| s.enabled && s.owner == owner && s.entity.key() == key && s.location == location)
        {
            bail!("owner {owner} already tracks {key} at {location}");
        }

        inner.next_id += 1;
        let id = SubscriptionId(inner.next_id);
        inner.entities.entry(key).or_insert_with(|| entity.clone());
        inner.subscriptions.push(Subscription {
            id,
            owner,
            entity,
            location,
            rule,
            enabled: true,
        });
        Ok(id)
    }

    pub fn set_enabled(&self, id: SubscriptionId, enabled: bool) -> bool {
        let mut inner = self.lock();
        match inner.subscriptions.iter_mut().find(|s| s.id == id) {
            Some(sub) => {
                sub.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn history(&self, entity: EntityKey, location: Location) -> Vec<HistoryPoint> {
        self.lock()
            .history
            .get(&(entity, location))
            .cloned()
            .unwrap_or_default()
    }

    pub fn price(&self, entity: EntityKey, location: Location) -> Option<Price> {
        self.lock().prices.get(&(entity, location)).cloned()
    }

    pub fn entity(&self, key: EntityKey) -> Option<TrackedEntity> {
        self.lock().entities.get(&key).cloned()
    }

    fn with_current_entity(inner: &Inner, sub: &Subscription) -> Subscription {
        let mut sub = sub.clone();
        if let Some(entity) = inner.entities.get(&sub.entity.key()) {
            sub.entity = entity.clone();
        }
        sub
    }
}

#[async_trait]
impl PriceStore for MemoryStore {
    async fn enabled_subscriptions(&self) -> Result<Vec<Subscription>> {
        let inner = self.lock();
        Ok(inner
            .subscriptions
            .iter()
            .filter(|s| s.enabled)
            .map(|s| Self::with_current_entity(&inner, s))
            .collect())
    }

    async fn subscriptions_for(&self, entity: EntityKey, location: Location) -> Result<Vec<Subscription>> {
        let inner = self.lock();
        Ok(inner
            .subscriptions
            .iter()
            .filter(|s| s.enabled && s.entity.key() == entity && s.location == location)
            .map(|s| Self::with_current_entity(&inner, s))
            .collect())
    }

    async fn current_price(&self, entity: EntityKey, location: Location) -> Result<Option<Price>> {
        Ok(self.price(entity, location))
    }

    async fn update_price(&self, entity: &TrackedEntity, price: &Price) -> Result<()> {
        let mut inner = self.lock();
        inner.entities.insert(entity.key(), entity.clone());
        inner
            .prices
            .insert((price.entity, price.location), price.clone());
        Ok(())
    }

    async fn append_history(&self, entity: EntityKey, location: Location, point: HistoryPoint) -> Result<bool> {
        let mut inner = self.lock();
        let series = inner.history.entry((entity, location)).or_default();
        if series
            .last()
            .is_some_and(|last| last.valid == point.valid && last.price == point.price)
        {
            return Ok(false);
        }
        series.push(point);
        Ok(true)
    }
}
