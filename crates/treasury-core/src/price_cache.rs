use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use crate::{Clock, DailyBar, LatestPrice, PriceGateway, TreasuryError};

struct CacheEntry {
    data: LatestPrice,
    cached_at: DateTime<Utc>,
}

/// TTL cache in front of a price gateway. Owned by whoever builds it, dropped with it.
///
/// Only successful quotes are cached. History requests pass straight through.
pub struct CachedPriceGateway<G> {
    inner: G,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    quotes: DashMap<String, CacheEntry>,
}

impl<G: PriceGateway> CachedPriceGateway<G> {
    pub fn new(inner: G, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            inner,
            clock,
            ttl,
            quotes: DashMap::new(),
        }
    }

    /// Drop every entry whose age has reached the TTL.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.quotes.len();
        self.quotes.retain(|_, entry| now - entry.cached_at < self.ttl);
        before - self.quotes.len()
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    fn fresh(&self, key: &str) -> Option<LatestPrice> {
        let entry = self.quotes.get(key)?;
        if self.clock.now() - entry.cached_at < self.ttl {
            Some(entry.data.clone())
        } else {
            None
        }
    }
}

#[async_trait]
impl<G: PriceGateway> PriceGateway for CachedPriceGateway<G> {
    async fn latest_price(&self, ticker: &str) -> Result<LatestPrice, TreasuryError> {
        let key = ticker.to_uppercase();
        if let Some(hit) = self.fresh(&key) {
            tracing::trace!("price cache hit for {}", key);
            return Ok(hit);
        }

        let quote = self.inner.latest_price(ticker).await?;
        self.quotes.insert(
            key,
            CacheEntry {
                data: quote.clone(),
                cached_at: self.clock.now(),
            },
        );
        Ok(quote)
    }

    async fn daily_history(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyBar>, TreasuryError> {
        self.inner.daily_history(ticker, from, to).await
    }
}
