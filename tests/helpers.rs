#![allow(dead_code)]

use pricewatch::fetch::{Fetcher, RetryPolicy};
use pricewatch::history::{HistoryCache, PriceHistoryClient};
use pricewatch::proxy::ProxyPool;
use pricewatch::site::SiteClient;
use pricewatch::stats::Stats;
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use wiremock::MockServer;

pub const HISTORY_PATH: &str = "/api/gh0/price_history";

/// Everything wired against one mock server standing in for the site and
/// its history API.
pub struct TestSite {
    pub server: MockServer,
    pub stats: Arc<Stats>,
    pub fetcher: Arc<Fetcher>,
    pub site: Arc<SiteClient>,
}

impl TestSite {
    pub async fn start(max_tries: u32) -> Self {
        let server = MockServer::start().await;
        let stats = Arc::new(Stats::default());
        let fetcher = Arc::new(Fetcher::new(
            Arc::new(ProxyPool::empty()),
            RetryPolicy::immediate(max_tries),
            Duration::from_secs(5),
            stats.clone(),
        ));
        let site = Arc::new(SiteClient::new(fetcher.clone()).with_origin(self_origin(&server)));
        Self {
            server,
            stats,
            fetcher,
            site,
        }
    }

    pub fn url(&self, path: &str) -> Url {
        Url::parse(&format!("{}{}", self.server.uri(), path)).unwrap()
    }

    pub fn history_client(&self) -> PriceHistoryClient {
        PriceHistoryClient::new(
            self.fetcher.clone(),
            self.site.clone(),
            self.url(HISTORY_PATH),
            HistoryCache::new(Duration::from_secs(3600)),
        )
    }
}

fn self_origin(server: &MockServer) -> Url {
    Url::parse(&server.uri()).unwrap()
}

pub fn product_page(name: &str, price: &str) -> String {
    format!(
        r#"<html><body>
             <div class="variant__header"><h1>{name}</h1></div>
             <div id="offer__price-0"><span class="gh_price">{price}</span></div>
           </body></html>"#
    )
}

pub fn wishlist_page(name: &str, total: &str, items: &[(u64, u64)]) -> String {
    let rows: String = items
        .iter()
        .map(|(id, count)| format!(r#"<div class="wishlist__item" data-id="{id}" data-count="{count}"></div>"#))
        .collect();
    format!(
        r#"<html><body>
             <div class="wishlist"><h1 class="wishlist__headline"><span>{name}</span></h1></div>
             <div class="wishlist_sum_area">
               <span class="gh_price"><span class="gh_price"><span class="gh_price">{total}</span></span></span>
             </div>
             {rows}
           </body></html>"#
    )
}

/// History API answer with the given `[ts, price, flag]` samples.
pub fn history_body(points: &[(i64, f64, u8)]) -> serde_json::Value {
    let response: Vec<serde_json::Value> = points
        .iter()
        .map(|(ts, price, flag)| serde_json::json!([ts, price, flag]))
        .collect();
    serde_json::json!({ "meta": { "current_best": points.last().map(|p| p.1) }, "response": response })
}
