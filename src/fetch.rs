use rand::{Rng, rng};
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONNECTION, CONTENT_TYPE, DNT, HeaderMap, HeaderName,
    HeaderValue, PRAGMA, REFERER, RETRY_AFTER, UPGRADE_INSECURE_REQUESTS, USER_AGENT,
};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::proxy::{ProxyEndpoint, ProxyPool};
use crate::stats::Stats;

const HTML_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const JSON_ACCEPT: &str = "application/json, text/plain, */*";

/// How often and how patiently a rate-limited request is retried.
///
/// Only 429 answers are retried. The delay before attempt `n + 1` is
/// `base * 2^(n-1)` capped at `max`, half of it fixed and half random.
/// A zero `base` retries immediately.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_tries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn immediate(max_tries: u32) -> Self {
        Self {
            max_tries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay after the `attempt`-th (1-based) rate-limited answer.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(1).min(16);
        let backoff = self
            .base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay);
        let half = backoff / 2;
        let jitter = rng().random_range(0..=half.as_millis() as u64);
        let delay = half + Duration::from_millis(jitter);

        match retry_after {
            Some(ra) => delay.max(ra).min(self.max_delay),
            None => delay,
        }
    }
}

/// Body and status of a successful response.
#[derive(Clone, Debug)]
pub struct FetchedPage {
    pub status: StatusCode,
    pub body: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Profile {
    Desktop,
    Mobile,
}

impl Profile {
    fn flip(self) -> Self {
        match self {
            Profile::Desktop => Profile::Mobile,
            Profile::Mobile => Profile::Desktop,
        }
    }
}

/// HTTP access to the site and its JSON API.
///
/// Every attempt builds a fresh client bound to the next proxy of the pool
/// (or none) with a random browser identity.
pub struct Fetcher {
    proxies: Arc<ProxyPool>,
    policy: RetryPolicy,
    timeout: Duration,
    stats: Arc<Stats>,
    cancel: CancellationToken,
}

impl Fetcher {
    pub fn new(proxies: Arc<ProxyPool>, policy: RetryPolicy, timeout: Duration, stats: Arc<Stats>) -> Self {
        Self {
            proxies,
            policy: RetryPolicy {
                max_tries: policy.max_tries.max(1),
                ..policy
            },
            timeout,
            stats,
            cancel: CancellationToken::new(),
        }
    }

    /// Backoff waits end early with `Error::Cancelled` once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// GET an HTML page.
    pub async fn get(&self, url: &Url) -> Result<FetchedPage> {
        self.execute(url, HTML_ACCEPT, |client| client.get(url.as_str()))
            .await
    }

    /// POST a JSON body, expecting JSON back.
    pub async fn post_json<T: Serialize + ?Sized>(&self, url: &Url, body: &T) -> Result<FetchedPage> {
        let payload = serde_json::to_vec(body)?;
        self.execute(url, JSON_ACCEPT, |client| {
            client
                .post(url.as_str())
                .header(CONTENT_TYPE, "application/json")
                .body(payload.clone())
        })
        .await
    }

    async fn execute<F>(&self, url: &Url, accept: &'static str, build: F) -> Result<FetchedPage>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let referer = origin_of(url);
        let max = self.policy.max_tries;
        let mut profile = Profile::Desktop;

        for attempt in 1..=max {
            let proxy = self.proxies.next();
            let client = self.client(proxy.as_ref())?;
            if let Some(p) = &proxy {
                debug!(proxy = %p, "using proxy");
            }

            self.stats.record_request();
            let rsp = match build(&client)
                .headers(base_headers(profile, &referer, accept))
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    self.stats.record_transport_error();
                    warn!(%url, error = %e, "request failed");
                    return Err(Error::Transport(e));
                }
            };

            let status = rsp.status();
            debug!(%url, ?profile, %status, attempt, "fetched");

            if status == StatusCode::TOO_MANY_REQUESTS {
                self.stats.record_rate_limited();
                let err = Error::RateLimited { status };
                warn!(%url, attempt, max, "{err}");
                if attempt < max {
                    let delay = self.policy.delay_for(attempt, retry_after(rsp.headers()));
                    if !delay.is_zero() {
                        tokio::select! {
                            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                            _ = sleep(delay) => {}
                        }
                    }
                    profile = profile.flip();
                }
                continue;
            }

            if !status.is_success() {
                return Err(Error::HttpStatus {
                    status,
                    url: url.to_string(),
                });
            }

            let body = rsp.text().await.inspect_err(|_| self.stats.record_transport_error())?;
            return Ok(FetchedPage {
                status,
                body,
            });
        }

        Err(Error::TooManyRetries {
            url: url.to_string(),
            attempts: max,
        })
    }

    fn client(&self, proxy: Option<&ProxyEndpoint>) -> Result<Client> {
        let mut builder = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(8))
            .timeout(self.timeout);
        if let Some(p) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(p.as_str())?);
        }
        Ok(builder.build()?)
    }
}

fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn base_headers(profile: Profile, referer: &str, accept: &'static str) -> HeaderMap {
    let mut h = HeaderMap::new();
    let ua = match profile {
        Profile::Desktop => random_desktop_ua(),
        Profile::Mobile => random_mobile_ua(),
    };
    h.insert(USER_AGENT, HeaderValue::from_static(ua));
    h.insert(ACCEPT, HeaderValue::from_static(accept));
    h.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("de-DE,de;q=0.9,en-US;q=0.8,en;q=0.7"),
    );
    if let Ok(v) = HeaderValue::from_str(referer) {
        h.insert(REFERER, v);
    }
    h.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    h.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    h.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    h.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    h.insert(DNT, HeaderValue::from_static("1"));
    h.insert(
        HeaderName::from_static("sec-fetch-site"),
        HeaderValue::from_static("same-origin"),
    );
    h.insert(
        HeaderName::from_static("sec-fetch-mode"),
        HeaderValue::from_static("navigate"),
    );
    h
}

fn random_desktop_ua() -> &'static str {
    const UAS: &[&str] = &[
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15",
    ];
    UAS[rng().random_range(0..UAS.len())]
}

fn random_mobile_ua() -> &'static str {
    const UAS: &[&str] = &[
        "Mozilla/5.0 (Linux; Android 14; Pixel 7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Mobile Safari/537.36",
        "Mozilla/5.0 (iPhone; CPU iPhone OS 17_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Mobile/15E148 Safari/604.1",
    ];
    UAS[rng().random_range(0..UAS.len())]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_base_means_immediate_retry() {
        let p = RetryPolicy::immediate(3);
        assert_eq!(p.delay_for(1, None), Duration::ZERO);
        assert_eq!(p.delay_for(2, Some(Duration::from_secs(30))), Duration::ZERO);
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let p = RetryPolicy {
            max_tries: 5,
            base_delay: Duration::from_millis(400),
            max_delay: Duration::from_millis(1000),
        };
        for _ in 0..20 {
            let first = p.delay_for(1, None);
            assert!(first >= Duration::from_millis(200) && first <= Duration::from_millis(400));
            let second = p.delay_for(2, None);
            assert!(second >= Duration::from_millis(400) && second <= Duration::from_millis(800));
            let late = p.delay_for(10, None);
            assert!(late >= Duration::from_millis(500) && late <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn retry_after_raises_delay_up_to_cap() {
        let p = RetryPolicy {
            max_tries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        };
        assert_eq!(p.delay_for(1, Some(Duration::from_secs(60))), Duration::from_secs(2));
    }

    #[test]
    fn headers_carry_identity() {
        let h = base_headers(Profile::Mobile, "https://geizhals.de", JSON_ACCEPT);
        assert!(h.get(USER_AGENT).unwrap().to_str().unwrap().contains("Mobile"));
        assert_eq!(h.get(REFERER).unwrap(), "https://geizhals.de");
        assert_eq!(h.get(ACCEPT).unwrap(), JSON_ACCEPT);
    }
}
