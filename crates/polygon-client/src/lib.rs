use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use treasury_core::{DailyBar, LatestPrice, PriceGateway, TreasuryError};

const BASE_URL: &str = "https://api.polygon.io";

/// Sliding-window rate limiter: at most `max_requests` per `window` duration.
#[derive(Clone)]
struct RateLimiter {
    timestamps: Arc<Mutex<VecDeque<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            timestamps: Arc::new(Mutex::new(VecDeque::new())),
            max_requests: max_requests.max(1),
            window,
        }
    }

    async fn acquire(&self) {
        loop {
            let mut ts = self.timestamps.lock().await;
            let now = Instant::now();

            while let Some(&front) = ts.front() {
                if now.duration_since(front) >= self.window {
                    ts.pop_front();
                } else {
                    break;
                }
            }

            let oldest = match ts.front().copied() {
                Some(oldest) if ts.len() >= self.max_requests => oldest,
                _ => {
                    ts.push_back(now);
                    return;
                }
            };

            // Wait until the oldest request falls out of the window
            let sleep_dur = (oldest + self.window).saturating_duration_since(now)
                + Duration::from_millis(50);
            drop(ts);
            tracing::debug!(
                "Rate limiter: waiting {:.1}s for Polygon API slot",
                sleep_dur.as_secs_f64()
            );
            tokio::time::sleep(sleep_dur).await;
        }
    }
}

/// Which Polygon market a ticker belongs to. Crypto pairs use the `X:` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketKind {
    Stocks,
    Crypto,
}

impl MarketKind {
    pub fn of(ticker: &str) -> Self {
        if ticker.starts_with("X:") {
            MarketKind::Crypto
        } else {
            MarketKind::Stocks
        }
    }
}

/// Quote currency for a ticker: the trailing three letters of a crypto pair, USD otherwise.
pub fn quote_currency(ticker: &str) -> String {
    match MarketKind::of(ticker) {
        MarketKind::Crypto => {
            let pair = ticker.trim_start_matches("X:");
            if pair.len() > 3 && pair.is_char_boundary(pair.len() - 3) {
                pair[pair.len() - 3..].to_uppercase()
            } else {
                "USD".to_string()
            }
        }
        MarketKind::Stocks => "USD".to_string(),
    }
}

#[derive(Clone)]
pub struct PolygonClient {
    api_key: String,
    client: Client,
    rate_limiter: RateLimiter,
    base_url: String,
}

impl PolygonClient {
    /// Free tier keys allow 5 requests per minute, paid plans far more.
    pub fn with_rate_limit(api_key: String, requests_per_minute: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            api_key,
            client,
            rate_limiter: RateLimiter::new(requests_per_minute, Duration::from_secs(60)),
            base_url: BASE_URL.to_string(),
        }
    }

    /// Point the client at another host (mock servers, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Send a request with rate limiting and automatic 429 retry.
    async fn send_request(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, TreasuryError> {
        let request = builder
            .build()
            .map_err(|e| TreasuryError::PriceGateway(e.to_string()))?;

        for attempt in 0..3u32 {
            self.rate_limiter.acquire().await;
            let req_clone = request
                .try_clone()
                .ok_or_else(|| TreasuryError::PriceGateway("Cannot clone request".to_string()))?;
            let response = self
                .client
                .execute(req_clone)
                .await
                .map_err(|e| TreasuryError::PriceGateway(e.to_string()))?;

            if response.status().as_u16() != 429 {
                return Ok(response);
            }

            let wait_secs = 15u64;
            tracing::warn!(
                "Polygon 429 rate limited, waiting {}s before retry {}/3",
                wait_secs,
                attempt + 1
            );
            tokio::time::sleep(Duration::from_secs(wait_secs)).await;
        }

        Err(TreasuryError::PriceGateway(
            "Rate limited by Polygon after 3 retries".to_string(),
        ))
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TreasuryError> {
        if response.status().is_success() {
            return Ok(response);
        }
        Err(TreasuryError::PriceGateway(format!(
            "HTTP {}: {}",
            response.status(),
            response.text().await.unwrap_or_default()
        )))
    }

    fn snapshot_url(&self, ticker: &str) -> String {
        match MarketKind::of(ticker) {
            MarketKind::Stocks => format!(
                "{}/v2/snapshot/locale/us/markets/stocks/tickers/{}",
                self.base_url, ticker
            ),
            MarketKind::Crypto => format!(
                "{}/v2/snapshot/locale/global/markets/crypto/tickers/{}",
                self.base_url, ticker
            ),
        }
    }

    /// Get daily aggregates (bars) for a ticker between two dates inclusive
    pub async fn get_daily_aggregates(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyBar>, TreasuryError> {
        let url = format!(
            "{}/v2/aggs/ticker/{}/range/1/day/{}/{}",
            self.base_url,
            ticker,
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d")
        );

        let response = self
            .send_request(self.client.get(&url).query(&[
                ("apiKey", self.api_key.as_str()),
                ("adjusted", "true"),
                ("sort", "asc"),
            ]))
            .await?;
        let response = Self::check_status(response).await?;

        let agg_response: AggregateResponse = response
            .json()
            .await
            .map_err(|e| TreasuryError::PriceGateway(e.to_string()))?;

        Ok(agg_response.into_daily_bars())
    }

    /// Get snapshot for a ticker (near-real-time last trade, today's OHLCV, prev day)
    pub async fn get_snapshot(&self, ticker: &str) -> Result<SnapshotTicker, TreasuryError> {
        let url = self.snapshot_url(ticker);

        let response = self
            .send_request(self.client.get(&url).query(&[("apiKey", &self.api_key)]))
            .await?;
        let response = Self::check_status(response).await?;

        let snap_response: SnapshotResponse = response
            .json()
            .await
            .map_err(|e| TreasuryError::PriceGateway(e.to_string()))?;

        Ok(snap_response.ticker)
    }
}

#[async_trait]
impl PriceGateway for PolygonClient {
    async fn latest_price(&self, ticker: &str) -> Result<LatestPrice, TreasuryError> {
        let snapshot = self.get_snapshot(ticker).await?;
        let price = snapshot.best_price().ok_or_else(|| {
            TreasuryError::PriceGateway(format!("snapshot for {} has no usable price", ticker))
        })?;

        Ok(LatestPrice {
            price,
            currency: quote_currency(ticker),
        })
    }

    async fn daily_history(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyBar>, TreasuryError> {
        self.get_daily_aggregates(ticker, from, to).await
    }
}

// Response structures
#[derive(Debug, Deserialize)]
struct AggregateResponse {
    #[serde(default)]
    results: Vec<AggregateResult>,
}

#[derive(Debug, Deserialize)]
struct AggregateResult {
    t: i64, // timestamp (ms)
    o: f64, // open
    h: f64, // high
    l: f64, // low
    c: f64, // close
    v: f64, // volume
}

impl AggregateResponse {
    fn into_daily_bars(self) -> Vec<DailyBar> {
        self.results
            .into_iter()
            .filter_map(|r| {
                let date = DateTime::from_timestamp_millis(r.t)?.date_naive();
                Some(DailyBar {
                    date,
                    open: r.o,
                    high: r.h,
                    low: r.l,
                    close: r.c,
                    volume: r.v,
                })
            })
            .collect()
    }
}

// Snapshot types
#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    ticker: SnapshotTicker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotTicker {
    pub day: Option<SnapshotDay>,
    #[serde(rename = "lastTrade")]
    pub last_trade: Option<SnapshotLastTrade>,
    #[serde(rename = "prevDay")]
    pub prev_day: Option<SnapshotDay>,
    #[serde(rename = "todaysChange")]
    pub todays_change: Option<f64>,
    #[serde(rename = "todaysChangePerc")]
    pub todays_change_perc: Option<f64>,
}

impl SnapshotTicker {
    /// Last trade, then today's close, then the previous close. Zeros are skipped.
    pub fn best_price(&self) -> Option<f64> {
        let usable = |p: Option<f64>| p.filter(|v| v.is_finite() && *v > 0.0);
        usable(self.last_trade.as_ref().and_then(|t| t.p))
            .or_else(|| usable(self.day.as_ref().and_then(|d| d.c)))
            .or_else(|| usable(self.prev_day.as_ref().and_then(|d| d.c)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDay {
    pub o: Option<f64>,
    pub h: Option<f64>,
    pub l: Option<f64>,
    pub c: Option<f64>,
    pub v: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotLastTrade {
    pub p: Option<f64>,
    pub s: Option<f64>,
    pub t: Option<i64>,
}
