use std::collections::HashMap;

use crate::model::{EntityKey, Location};
use crate::site::ObservedPrice;

/// Prices already downloaded in the current cycle, keyed by (entity, location).
///
/// Create one per cycle and drop it when the cycle ends; its lifetime is the
/// only staleness bound it has.
#[derive(Debug, Default)]
pub struct FetchDedupCache {
    prices: HashMap<(EntityKey, Location), ObservedPrice>,
}

impl FetchDedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity: EntityKey, location: Location) -> Option<&ObservedPrice> {
        self.prices.get(&(entity, location))
    }

    pub fn put(&mut self, entity: EntityKey, location: Location, price: ObservedPrice) {
        self.prices.insert((entity, location), price);
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Currency, EntityKind};

    fn key(id: u64) -> EntityKey {
        EntityKey {
            kind: EntityKind::Product,
            id,
        }
    }

    fn observed(amount: f64) -> ObservedPrice {
        ObservedPrice {
            name: "Thing".into(),
            amount,
            currency: Currency::Eur,
        }
    }

    #[test]
    fn put_then_get() {
        let mut cache = FetchDedupCache::new();
        assert!(cache.get(key(1234), Location::De).is_none());

        cache.put(key(1234), Location::De, observed(1.0));
        assert_eq!(cache.get(key(1234), Location::De).unwrap().amount, 1.0);
        assert!(cache.get(key(1234), Location::At).is_none());

        cache.put(key(1234), Location::At, observed(34.56));
        assert_eq!(cache.get(key(1234), Location::At).unwrap().amount, 34.56);
    }

    #[test]
    fn kind_is_part_of_the_key() {
        let mut cache = FetchDedupCache::new();
        cache.put(key(7), Location::De, observed(2.0));
        let wishlist = EntityKey {
            kind: EntityKind::Wishlist,
            id: 7,
        };
        assert!(cache.get(wishlist, Location::De).is_none());
    }

    #[test]
    fn new_cycle_starts_empty() {
        let mut previous = FetchDedupCache::new();
        previous.put(key(1), Location::De, observed(9.0));
        drop(previous);

        let current = FetchDedupCache::new();
        assert!(current.get(key(1), Location::De).is_none());
        assert!(current.is_empty());
    }
}
