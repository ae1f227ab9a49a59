use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use treasury_core::{
    AlertDirection, AlertRule, CompanyProfile, NotificationRecord, RawDailyPrice, RawDisclosure,
};

use crate::db::parse_db_timestamp;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CompanyRow {
    pub id: String,
    pub name: String,
    pub ticker: String,
    pub asset_ticker: String,
    pub other_assets_value: f64,
}

impl From<CompanyRow> for CompanyProfile {
    fn from(row: CompanyRow) -> Self {
        CompanyProfile {
            id: row.id,
            name: row.name,
            ticker: row.ticker,
            asset_ticker: row.asset_ticker,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyInput {
    pub id: String,
    pub name: String,
    pub ticker: String,
    pub asset_ticker: String,
    pub other_assets_value: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DisclosureRow {
    pub id: i64,
    pub company_id: String,
    pub effective_at: String,
    pub held_asset_quantity: Option<f64>,
    pub avg_acquisition_price: Option<f64>,
    pub cash_holdings: Option<f64>,
    pub staking_rewards: Option<f64>,
    pub concentration_per_mille: Option<f64>,
    pub notes: Option<String>,
}

impl TryFrom<DisclosureRow> for RawDisclosure {
    type Error = anyhow::Error;

    fn try_from(row: DisclosureRow) -> Result<Self> {
        let effective_at = parse_db_timestamp(&row.effective_at)
            .with_context(|| format!("disclosure {} has bad effective_at", row.id))?;
        Ok(RawDisclosure {
            company_id: row.company_id,
            effective_at,
            held_asset_quantity: row.held_asset_quantity,
            avg_acquisition_price: row.avg_acquisition_price,
            cash_holdings: row.cash_holdings,
            staking_rewards: row.staking_rewards,
            concentration_per_mille: row.concentration_per_mille,
            notes: row.notes,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DailyPriceRow {
    pub company_id: String,
    pub date: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl TryFrom<DailyPriceRow> for RawDailyPrice {
    type Error = anyhow::Error;

    fn try_from(row: DailyPriceRow) -> Result<Self> {
        let date = NaiveDate::parse_from_str(&row.date, "%Y-%m-%d")
            .with_context(|| format!("price row for {} has bad date '{}'", row.company_id, row.date))?;
        Ok(RawDailyPrice {
            company_id: row.company_id,
            date,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AlertRuleRow {
    pub id: i64,
    pub user_id: String,
    pub company_id: String,
    pub threshold: f64,
    pub direction: String,
    pub is_active: bool,
    pub last_triggered_at: Option<String>,
}

impl TryFrom<AlertRuleRow> for AlertRule {
    type Error = anyhow::Error;

    fn try_from(row: AlertRuleRow) -> Result<Self> {
        let direction: AlertDirection = row.direction.parse()?;
        let last_triggered_at = row
            .last_triggered_at
            .as_deref()
            .map(parse_db_timestamp)
            .transpose()
            .with_context(|| format!("alert {} has bad last_triggered_at", row.id))?;
        Ok(AlertRule {
            id: row.id,
            user_id: row.user_id,
            company_id: row.company_id,
            threshold: row.threshold,
            direction,
            is_active: row.is_active,
            last_triggered_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRuleInput {
    pub user_id: String,
    pub company_id: String,
    pub threshold: f64,
    pub direction: AlertDirection,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationRow {
    pub id: i64,
    pub alert_id: i64,
    pub company_id: String,
    pub measured_mnav: f64,
    pub threshold: f64,
    pub direction: String,
    pub created_at: String,
    pub email_sent: bool,
    pub chat_sent: bool,
}

impl TryFrom<NotificationRow> for NotificationRecord {
    type Error = anyhow::Error;

    fn try_from(row: NotificationRow) -> Result<Self> {
        Ok(NotificationRecord {
            id: row.id,
            alert_id: row.alert_id,
            company_id: row.company_id,
            measured_mnav: row.measured_mnav,
            threshold: row.threshold,
            direction: row.direction.parse()?,
            created_at: parse_db_timestamp(&row.created_at)?,
            email_sent: row.email_sent,
            chat_sent: row.chat_sent,
        })
    }
}
