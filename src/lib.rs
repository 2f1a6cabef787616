//! Periodic price tracking for geizhals listings: fetch, compare, record,
//! notify.

pub mod config;
pub mod dedup;
pub mod error;
pub mod fetch;
pub mod history;
pub mod listing;
pub mod model;
pub mod notify;
pub mod parse;
pub mod proxy;
pub mod scheduler;
pub mod server;
pub mod site;
pub mod stats;
pub mod store;
pub mod tracker;

pub use error::{Error, Result};
pub use fetch::{Fetcher, RetryPolicy};
pub use history::{HistoryCache, PriceHistory, PriceHistoryClient};
pub use listing::{EntityRef, parse_listing_url};
pub use model::{EntityKind, Location, TrackedEntity};
pub use notify::{NotificationIntent, NotificationRule, NotificationSink};
pub use proxy::ProxyPool;
pub use scheduler::Scheduler;
pub use site::{PriceSource, SiteClient};
pub use store::{MemoryStore, PriceStore};
pub use tracker::{CycleReport, CycleRunner, Tracker};
