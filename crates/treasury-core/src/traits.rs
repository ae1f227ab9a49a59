use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::{
    AlertDirection, AlertRule, CompanyProfile, DailyBar, LatestPrice, NavSnapshot, RawDailyPrice,
    RawDisclosure, TreasuryError, TriggerEvent,
};

/// Read side of the disclosure and price tables. Rows come back ordered by date ascending.
#[async_trait]
pub trait MetricStore: Send + Sync {
    async fn get_disclosures(
        &self,
        company_id: &str,
        from: Option<NaiveDate>,
    ) -> Result<Vec<RawDisclosure>, TreasuryError>;

    async fn get_daily_prices(
        &self,
        company_id: &str,
        from: Option<NaiveDate>,
    ) -> Result<Vec<RawDailyPrice>, TreasuryError>;
}

/// Ticker mapping and the auxiliary "other assets" figure for a company.
#[async_trait]
pub trait CompanyDirectory: Send + Sync {
    async fn get_company(&self, company_id: &str) -> Result<Option<CompanyProfile>, TreasuryError>;

    async fn other_assets_value(&self, company_id: &str) -> Result<f64, TreasuryError>;
}

/// A source of market prices. Implementations may cache; callers only get "latest known".
#[async_trait]
pub trait PriceGateway: Send + Sync {
    async fn latest_price(&self, ticker: &str) -> Result<LatestPrice, TreasuryError>;

    /// Daily bars between two dates inclusive. Gateways without history return nothing.
    async fn daily_history(
        &self,
        _ticker: &str,
        _from: NaiveDate,
        _to: NaiveDate,
    ) -> Result<Vec<DailyBar>, TreasuryError> {
        Ok(Vec::new())
    }
}

#[async_trait]
pub trait AlertRuleStore: Send + Sync {
    async fn list_active_rules(&self) -> Result<Vec<AlertRule>, TreasuryError>;

    async fn mark_triggered(&self, rule_id: i64, at: DateTime<Utc>) -> Result<(), TreasuryError>;

    /// Atomically stamp `last_triggered_at` and insert the notification, but only if the
    /// rule is still active and its last trigger is null or strictly older than `cutoff`.
    /// Returns the notification id, or `None` when another invocation got there first.
    async fn trigger_if_cooled(
        &self,
        event: &TriggerEvent,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<i64>, TreasuryError>;
}

/// Hand-off point towards the delivery channels.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn record(
        &self,
        alert_id: i64,
        company_id: &str,
        measured_value: f64,
        threshold: f64,
        direction: AlertDirection,
    ) -> Result<i64, TreasuryError>;
}

/// Produces the current NAV snapshot for one company.
#[async_trait]
pub trait NavSource: Send + Sync {
    async fn current_nav(&self, company_id: &str) -> Result<NavSnapshot, TreasuryError>;
}
