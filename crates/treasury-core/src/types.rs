use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::TreasuryError;

/// One periodic disclosure for a treasury company. Any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDisclosure {
    pub company_id: String,
    pub effective_at: DateTime<Utc>,
    pub held_asset_quantity: Option<f64>,
    pub avg_acquisition_price: Option<f64>,
    /// Reported in millions of the base currency.
    pub cash_holdings: Option<f64>,
    pub staking_rewards: Option<f64>,
    /// Thousandths of a share backed by one unit of the held asset.
    pub concentration_per_mille: Option<f64>,
    pub notes: Option<String>,
}

impl RawDisclosure {
    /// True when at least one field carries a value.
    pub fn has_any_field(&self) -> bool {
        self.held_asset_quantity.is_some()
            || self.avg_acquisition_price.is_some()
            || self.cash_holdings.is_some()
            || self.staking_rewards.is_some()
            || self.concentration_per_mille.is_some()
            || self.notes.as_deref().is_some_and(|n| !n.trim().is_empty())
    }
}

/// Daily OHLCV row for the traded equity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDailyPrice {
    pub company_id: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// One day of the dense, forward-filled company series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedDailyMetric {
    pub company_id: String,
    pub date: NaiveDate,
    /// Equity close carried forward to this day.
    pub equity_price: f64,
    pub held_asset_quantity: Option<f64>,
    pub avg_acquisition_price: Option<f64>,
    /// Base currency units (disclosed millions scaled up).
    pub cash_holdings: Option<f64>,
    pub staking_rewards: Option<f64>,
    pub concentration_per_mille: Option<f64>,
    pub shares_outstanding: Option<f64>,
    pub market_cap: Option<f64>,
    pub issued_delta: Option<f64>,
    pub shares_bought_back_delta: Option<f64>,
    pub notes: Option<String>,
}

/// Point-in-time NAV for a company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavSnapshot {
    pub company_id: String,
    pub as_of: NaiveDate,
    pub nav_per_share: f64,
    pub live_equity_price: f64,
    pub live_asset_price: f64,
    pub market_cap: f64,
    pub total_nav_value: f64,
    /// market_cap / total_nav_value. Above 1 is a premium, below 1 a discount.
    pub mnav: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertDirection {
    Above,
    Below,
}

impl AlertDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertDirection::Above => "above",
            AlertDirection::Below => "below",
        }
    }

    /// Strict comparison: a value equal to the threshold never crosses.
    pub fn is_crossed(&self, measured: f64, threshold: f64) -> bool {
        match self {
            AlertDirection::Above => measured > threshold,
            AlertDirection::Below => measured < threshold,
        }
    }
}

impl fmt::Display for AlertDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertDirection {
    type Err = TreasuryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "above" => Ok(AlertDirection::Above),
            "below" => Ok(AlertDirection::Below),
            other => Err(TreasuryError::StoreReadFailure(format!(
                "unknown alert direction '{}'",
                other
            ))),
        }
    }
}

/// User-defined mNAV threshold rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: i64,
    pub user_id: String,
    pub company_id: String,
    pub threshold: f64,
    pub direction: AlertDirection,
    pub is_active: bool,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

impl AlertRule {
    /// Cooling while `now - last_triggered_at <= cooldown`. Never-fired rules are armed.
    pub fn is_cooling(&self, now: DateTime<Utc>, cooldown: chrono::Duration) -> bool {
        match self.last_triggered_at {
            Some(last) => now - last <= cooldown,
            None => false,
        }
    }

    pub fn is_crossed_by(&self, mnav: f64) -> bool {
        self.direction.is_crossed(mnav, self.threshold)
    }
}

/// A fired alert, as handed to the delivery side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: i64,
    pub alert_id: i64,
    pub company_id: String,
    pub measured_mnav: f64,
    pub threshold: f64,
    pub direction: AlertDirection,
    pub created_at: DateTime<Utc>,
    pub email_sent: bool,
    pub chat_sent: bool,
}

/// Everything needed to persist one trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerEvent {
    pub alert_id: i64,
    pub company_id: String,
    pub measured_mnav: f64,
    pub threshold: f64,
    pub direction: AlertDirection,
    pub triggered_at: DateTime<Utc>,
}

impl TriggerEvent {
    pub fn for_rule(rule: &AlertRule, measured_mnav: f64, triggered_at: DateTime<Utc>) -> Self {
        Self {
            alert_id: rule.id,
            company_id: rule.company_id.clone(),
            measured_mnav,
            threshold: rule.threshold,
            direction: rule.direction,
            triggered_at,
        }
    }
}

/// Latest quote returned by a price gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestPrice {
    pub price: f64,
    pub currency: String,
}

/// Historical daily bar from a price gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl DailyBar {
    pub fn into_raw_price(self, company_id: &str) -> RawDailyPrice {
        RawDailyPrice {
            company_id: company_id.to_string(),
            date: self.date,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

/// How a company maps onto market tickers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub id: String,
    pub name: String,
    /// Equity ticker, e.g. `MSTR`.
    pub ticker: String,
    /// Underlying asset ticker, e.g. `X:BTCUSD`.
    pub asset_ticker: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn rule(direction: AlertDirection, last: Option<DateTime<Utc>>) -> AlertRule {
        AlertRule {
            id: 1,
            user_id: "u1".to_string(),
            company_id: "mstr".to_string(),
            threshold: 1.0,
            direction,
            is_active: true,
            last_triggered_at: last,
        }
    }

    #[test]
    fn test_threshold_equality_never_crosses() {
        assert!(!AlertDirection::Above.is_crossed(1.0, 1.0));
        assert!(!AlertDirection::Below.is_crossed(1.0, 1.0));
        assert!(AlertDirection::Above.is_crossed(1.0001, 1.0));
        assert!(AlertDirection::Below.is_crossed(0.9999, 1.0));
    }

    #[test]
    fn test_cooling_window() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let r = rule(AlertDirection::Below, Some(t0));
        assert!(r.is_cooling(t0 + Duration::hours(1), Duration::hours(6)));
        assert!(r.is_cooling(t0 + Duration::hours(6), Duration::hours(6)));
        assert!(!r.is_cooling(t0 + Duration::hours(7), Duration::hours(6)));

        let never = rule(AlertDirection::Below, None);
        assert!(!never.is_cooling(t0, Duration::hours(6)));
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!("Above".parse::<AlertDirection>().unwrap(), AlertDirection::Above);
        assert_eq!(" below ".parse::<AlertDirection>().unwrap(), AlertDirection::Below);
        assert!("sideways".parse::<AlertDirection>().is_err());
        assert_eq!(
            serde_json::to_string(&AlertDirection::Below).unwrap(),
            "\"below\""
        );
    }

    #[test]
    fn test_blank_disclosure_has_no_field() {
        let d = RawDisclosure {
            company_id: "mstr".to_string(),
            notes: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(!d.has_any_field());

        let d = RawDisclosure {
            cash_holdings: Some(0.0),
            ..d
        };
        assert!(d.has_any_field());
    }
}
