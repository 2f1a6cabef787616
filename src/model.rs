use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

use crate::error::Error;
use crate::notify::NotificationRule;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Product,
    Wishlist,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Product => f.write_str("product"),
            EntityKind::Wishlist => f.write_str("wishlist"),
        }
    }
}

/// Products and wishlists share the site's numeric id space, so an id alone
/// is ambiguous; the kind travels with it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: u64,
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Site region. Decides the domain used for fetches and the currency.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    De,
    At,
    Eu,
    Pl,
    Uk,
}

impl Location {
    pub const ALL: [Location; 5] = [
        Location::De,
        Location::At,
        Location::Eu,
        Location::Pl,
        Location::Uk,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Location::De => "de",
            Location::At => "at",
            Location::Eu => "eu",
            Location::Pl => "pl",
            Location::Uk => "uk",
        }
    }

    pub fn domain(self) -> &'static str {
        match self {
            Location::De => "geizhals.de",
            Location::At => "geizhals.at",
            Location::Eu => "geizhals.eu",
            Location::Pl => "cenowarka.pl",
            Location::Uk => "skinflint.co.uk",
        }
    }

    pub fn from_domain(host: &str) -> Option<Location> {
        let host = host.strip_prefix("www.").unwrap_or(host);
        Location::ALL.into_iter().find(|l| l.domain() == host)
    }

    pub fn currency(self) -> Currency {
        match self {
            Location::De | Location::At | Location::Eu => Currency::Eur,
            Location::Pl => Currency::Pln,
            Location::Uk => Currency::Gbp,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Location {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        Location::ALL
            .into_iter()
            .find(|l| l.code() == s)
            .ok_or_else(|| Error::InvalidUrl(format!("unknown location '{s}'")))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Eur,
    Pln,
    Gbp,
}

impl Currency {
    pub fn symbol(self) -> &'static str {
        match self {
            Currency::Eur => "€",
            Currency::Pln => "zł",
            Currency::Gbp => "£",
        }
    }

    /// Formats an amount the way notifications show it, e.g. `19.99 €`.
    pub fn format(self, amount: f64) -> String {
        format!("{:.2} {}", amount, self.symbol())
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A tracked product or wishlist. Everything but `display_name` is fixed once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackedEntity {
    pub id: u64,
    pub kind: EntityKind,
    /// Site-relative path without locale parameters, e.g. `jabra-elite-85t-a2378831.html`.
    pub canonical_path: String,
    pub display_name: String,
}

impl TrackedEntity {
    pub fn key(&self) -> EntityKey {
        EntityKey {
            kind: self.kind,
            id: self.id,
        }
    }

    /// Public URL of the listing on the site serving `location`.
    pub fn url(&self, location: Location) -> String {
        format!("https://{}/{}", location.domain(), self.canonical_path)
    }

    pub fn name_or_path(&self) -> &str {
        if self.display_name.is_empty() {
            &self.canonical_path
        } else {
            &self.display_name
        }
    }
}

/// Current price of an entity at one location.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub entity: EntityKey,
    pub location: Location,
    pub amount: f64,
    pub currency: Currency,
    #[serde(with = "time::serde::rfc3339")]
    pub observed_at: OffsetDateTime,
}

/// One sample of a price series. `valid == false` marks a gap: consumers carry
/// the last valid price forward instead of reading `price`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub price: f64,
    pub valid: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

/// Chat or account the notifications of a subscription go to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub i64);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub owner: OwnerId,
    pub entity: TrackedEntity,
    pub location: Location,
    pub rule: NotificationRule,
    pub enabled: bool,
}
