use async_trait::async_trait;
use chrono::Duration;
use nav_engine::{MetricSeriesFiller, NavCalculator};
use std::sync::Arc;
use treasury_core::{
    Clock, CompanyDirectory, MetricStore, NavSnapshot, NavSource, PriceGateway, RawDailyPrice,
    TreasuryError,
};

/// Per-company NAV pipeline: stored series, live quotes, calculator.
pub struct CompanyNavService {
    store: Arc<dyn MetricStore>,
    directory: Arc<dyn CompanyDirectory>,
    gateway: Arc<dyn PriceGateway>,
    clock: Arc<dyn Clock>,
    calculator: NavCalculator,
    lookback_days: i64,
    gateway_timeout: std::time::Duration,
}

impl CompanyNavService {
    pub fn new(
        store: Arc<dyn MetricStore>,
        directory: Arc<dyn CompanyDirectory>,
        gateway: Arc<dyn PriceGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            directory,
            gateway,
            clock,
            calculator: NavCalculator::new(),
            lookback_days: 30,
            gateway_timeout: std::time::Duration::from_secs(10),
        }
    }

    pub fn with_lookback_days(mut self, days: i64) -> Self {
        self.lookback_days = days;
        self
    }

    pub fn with_gateway_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.gateway_timeout = timeout;
        self
    }

    async fn live_price(&self, ticker: &str) -> Result<f64, TreasuryError> {
        match tokio::time::timeout(self.gateway_timeout, self.gateway.latest_price(ticker)).await {
            Ok(Ok(quote)) => Ok(quote.price),
            Ok(Err(e)) => Err(TreasuryError::MissingPriceData(format!("{}: {}", ticker, e))),
            Err(_) => Err(TreasuryError::MissingPriceData(format!(
                "{}: quote timed out after {:?}",
                ticker, self.gateway_timeout
            ))),
        }
    }

    /// Stored closes for the window, or the gateway's daily bars when the store has none.
    async fn window_prices(
        &self,
        company_id: &str,
        equity_ticker: &str,
        from: chrono::NaiveDate,
        to: chrono::NaiveDate,
    ) -> Result<Vec<RawDailyPrice>, TreasuryError> {
        let stored = self.store.get_daily_prices(company_id, Some(from)).await?;
        if !stored.is_empty() {
            return Ok(stored);
        }

        tracing::debug!(
            "No stored prices for {} since {}, asking gateway for {}",
            company_id,
            from,
            equity_ticker
        );
        let history = tokio::time::timeout(
            self.gateway_timeout,
            self.gateway.daily_history(equity_ticker, from, to),
        )
        .await;

        match history {
            Ok(Ok(bars)) => Ok(bars
                .into_iter()
                .map(|bar| bar.into_raw_price(company_id))
                .collect()),
            Ok(Err(e)) => {
                tracing::warn!("Price history for {} unavailable: {}", equity_ticker, e);
                Ok(Vec::new())
            }
            Err(_) => {
                tracing::warn!("Price history for {} timed out", equity_ticker);
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl NavSource for CompanyNavService {
    async fn current_nav(&self, company_id: &str) -> Result<NavSnapshot, TreasuryError> {
        let today = self.clock.now().date_naive();
        let start = Duration::try_days(self.lookback_days)
            .and_then(|lookback| today.checked_sub_signed(lookback))
            .ok_or_else(|| {
                TreasuryError::Configuration(format!(
                    "lookback of {} days before {} is out of range",
                    self.lookback_days, today
                ))
            })?;

        let profile = self
            .directory
            .get_company(company_id)
            .await?
            .ok_or_else(|| {
                TreasuryError::MissingMetricData(format!("{}: unknown company", company_id))
            })?;

        let disclosures = self.store.get_disclosures(company_id, None).await?;
        let prices = self
            .window_prices(company_id, &profile.ticker, start, today)
            .await?;

        let fill = MetricSeriesFiller::new(today).fill_detailed(&disclosures, &prices, start);
        if fill.derivation_failures > 0 {
            tracing::debug!(
                "{}: {} days dropped by share derivation",
                company_id,
                fill.derivation_failures
            );
        }
        let latest = fill.rows.last().ok_or_else(|| {
            TreasuryError::MissingMetricData(format!(
                "{}: no derived metrics since {} ({} disclosures, {} prices)",
                company_id,
                start,
                disclosures.len(),
                prices.len()
            ))
        })?;

        let (equity_price, asset_price) = tokio::join!(
            self.live_price(&profile.ticker),
            self.live_price(&profile.asset_ticker)
        );
        let (equity_price, asset_price) = (equity_price?, asset_price?);

        let other_assets_value = self.directory.other_assets_value(company_id).await?;

        self.calculator.compute_current_nav(
            latest,
            equity_price,
            asset_price,
            other_assets_value,
            today,
        )
    }
}
