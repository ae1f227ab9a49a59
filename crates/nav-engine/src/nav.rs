use chrono::NaiveDate;
use treasury_core::{DerivedDailyMetric, NavSnapshot, TreasuryError};

/// Prices the latest known holdings composition at live market prices.
#[derive(Debug, Clone, Copy, Default)]
pub struct NavCalculator;

fn usable_price(price: f64) -> bool {
    price.is_finite() && price != 0.0
}

impl NavCalculator {
    pub fn new() -> Self {
        Self
    }

    /// `as_of` is the invocation date, not the date of `latest`.
    ///
    /// Unlike the series fill, a cash figure of exactly zero is a present value here.
    pub fn compute_current_nav(
        &self,
        latest: &DerivedDailyMetric,
        live_equity_price: f64,
        live_asset_price: f64,
        other_assets_value: f64,
        as_of: NaiveDate,
    ) -> Result<NavSnapshot, TreasuryError> {
        if !usable_price(live_equity_price) {
            return Err(TreasuryError::MissingPriceData(format!(
                "{}: no live equity price",
                latest.company_id
            )));
        }
        if !usable_price(live_asset_price) {
            return Err(TreasuryError::MissingPriceData(format!(
                "{}: no live asset price",
                latest.company_id
            )));
        }

        let missing = |field: &str| {
            TreasuryError::MissingMetricData(format!(
                "{}: {} unresolved as of {}",
                latest.company_id, field, latest.date
            ))
        };
        let held = latest
            .held_asset_quantity
            .ok_or_else(|| missing("held asset quantity"))?;
        let shares = latest
            .shares_outstanding
            .ok_or_else(|| missing("shares outstanding"))?;
        let cash = latest.cash_holdings.ok_or_else(|| missing("cash holdings"))?;

        let asset_market_value = held * live_asset_price;
        let total_nav_value = asset_market_value + cash + other_assets_value;
        if !total_nav_value.is_finite() || total_nav_value <= 0.0 {
            return Err(TreasuryError::InvalidNav(format!(
                "{}: total NAV {} (assets {}, cash {}, other {})",
                latest.company_id, total_nav_value, asset_market_value, cash, other_assets_value
            )));
        }

        let market_cap = live_equity_price * shares;
        let nav_per_share = total_nav_value / shares;
        let mnav = market_cap / total_nav_value;
        if !nav_per_share.is_finite() || !mnav.is_finite() {
            return Err(TreasuryError::InvalidNav(format!(
                "{}: non-finite ratio from {} shares",
                latest.company_id, shares
            )));
        }

        Ok(NavSnapshot {
            company_id: latest.company_id.clone(),
            as_of,
            nav_per_share,
            live_equity_price,
            live_asset_price,
            market_cap,
            total_nav_value,
            mnav,
        })
    }
}
