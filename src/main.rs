use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use pricewatch::config::{Args, Config};
use pricewatch::history::{HistoryCache, PriceHistoryClient};
use pricewatch::notify::ChannelSink;
use pricewatch::proxy::{ProxyPool, load_proxy_list};
use pricewatch::scheduler::Scheduler;
use pricewatch::server::{self, AppState};
use pricewatch::site::SiteClient;
use pricewatch::stats::Stats;
use pricewatch::store::MemoryStore;
use pricewatch::tracker::{CycleRunner, Tracker};
use pricewatch::Fetcher;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pricewatch=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_store(config: &Config) -> Result<MemoryStore> {
    let store = MemoryStore::new();
    for sub in &config.subscriptions {
        let (owner, entity, location) = sub.resolve()?;
        let id = store.subscribe(owner, entity, location, sub.rule)?;
        if !sub.enabled {
            store.set_enabled(id, false);
        }
    }
    Ok(store)
}

fn build_proxies(config: &Config) -> Result<ProxyPool> {
    if !config.proxy.enabled {
        return Ok(ProxyPool::empty());
    }
    let endpoints = load_proxy_list(&config.proxy.list_path)?;
    if endpoints.is_empty() {
        warn!(path = %config.proxy.list_path.display(), "proxy list is empty, fetching directly");
    }
    Ok(ProxyPool::new(endpoints, config.proxy.shuffle))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();
    let config = Config::load(&args.config)?;

    let stats = Arc::new(Stats::default());
    let proxies = Arc::new(build_proxies(&config)?);
    info!(proxies = proxies.len(), subscriptions = config.subscriptions.len(), "starting pricewatch");

    let cancel = CancellationToken::new();
    let fetcher = Arc::new(
        Fetcher::new(
            proxies,
            config.fetch.retry_policy(),
            config.fetch.timeout(),
            stats.clone(),
        )
        .with_cancellation(cancel.clone()),
    );
    let site = Arc::new(SiteClient::new(fetcher.clone()));
    let api_url = Url::parse(&config.history.api_url).context("invalid history api url")?;
    let history = Arc::new(
        PriceHistoryClient::new(fetcher, site.clone(), api_url, HistoryCache::new(config.history.ttl()))
            .with_days(config.history.days),
    );
    let notifications = Arc::new(ChannelSink::new(64));
    let store = Arc::new(build_store(&config)?);
    let tracker = Arc::new(Tracker::new(store, site, notifications.clone(), stats.clone()));

    if args.once {
        let report = tracker.run_cycle(&cancel).await?;
        stats.record_cycle(&report);
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let scheduler = Scheduler::new(tracker, config.interval(), stats.clone());
    let scheduler_task = tokio::spawn({
        let cancel = cancel.clone();
        async move { scheduler.run(cancel).await }
    });

    if config.server.enabled && !args.no_server {
        let server = server::serve(
            AppState {
                history,
                stats,
                notifications,
            },
            &config.server.bind,
        )
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
        let handle = server.handle();
        tokio::select! {
            res = server => res.context("http server failed")?,
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                handle.stop(true).await;
            }
        }
    } else {
        tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
        info!("shutting down");
    }

    cancel.cancel();
    scheduler_task.await.context("scheduler task panicked")?;
    Ok(())
}
