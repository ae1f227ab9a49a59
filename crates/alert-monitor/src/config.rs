use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use treasury_core::TreasuryError;

pub const MAX_LOOKBACK_DAYS: i64 = 36_500;
pub const MAX_COOLDOWN_HOURS: i64 = 8_760;
pub const MAX_INTERVAL_SECONDS: u64 = 86_400;
pub const MAX_GATEWAY_TIMEOUT_SECONDS: u64 = 600;
pub const MAX_PRICE_CACHE_TTL_SECONDS: i64 = 86_400;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    // Scheduling
    pub interval_seconds: u64,         // 300 (5 minutes)
    pub run_once: bool,                // single cycle then exit
    pub max_concurrent_companies: usize, // 4

    // Alerting
    pub cooldown_hours: i64,           // 6

    // Series
    pub lookback_days: i64,            // 30

    // Market data
    pub polygon_api_key: String,
    pub polygon_rate_limit: usize,     // requests per minute
    pub gateway_timeout_seconds: u64,  // 10
    pub price_cache_ttl_seconds: i64,  // 60

    // Database
    pub database_url: String,
}

impl MonitorConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            interval_seconds: env::var("MONITOR_INTERVAL_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .context("MONITOR_INTERVAL_SECS must be an integer")?,
            run_once: env::var("MONITOR_RUN_ONCE")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .context("MONITOR_RUN_ONCE must be true or false")?,
            max_concurrent_companies: env::var("MAX_CONCURRENT_COMPANIES")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .context("MAX_CONCURRENT_COMPANIES must be an integer")?,

            cooldown_hours: env::var("ALERT_COOLDOWN_HOURS")
                .unwrap_or_else(|_| "6".to_string())
                .parse()
                .context("ALERT_COOLDOWN_HOURS must be an integer")?,

            lookback_days: env::var("SERIES_LOOKBACK_DAYS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("SERIES_LOOKBACK_DAYS must be an integer")?,

            polygon_api_key: env::var("POLYGON_API_KEY").context("POLYGON_API_KEY not set")?,
            polygon_rate_limit: env::var("POLYGON_RATE_LIMIT")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .context("POLYGON_RATE_LIMIT must be an integer")?,
            gateway_timeout_seconds: env::var("GATEWAY_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("GATEWAY_TIMEOUT_SECS must be an integer")?,
            price_cache_ttl_seconds: env::var("PRICE_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("PRICE_CACHE_TTL_SECS must be an integer")?,

            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:treasury.db".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TreasuryError> {
        let invalid = |msg: String| Err(TreasuryError::Configuration(msg));

        if self.interval_seconds == 0 || self.interval_seconds > MAX_INTERVAL_SECONDS {
            return invalid(format!(
                "MONITOR_INTERVAL_SECS must be between 1 and {}, got {}",
                MAX_INTERVAL_SECONDS, self.interval_seconds
            ));
        }
        if self.max_concurrent_companies == 0 {
            return invalid("MAX_CONCURRENT_COMPANIES must be greater than zero".to_string());
        }
        if self.lookback_days <= 0 || self.lookback_days > MAX_LOOKBACK_DAYS {
            return invalid(format!(
                "SERIES_LOOKBACK_DAYS must be between 1 and {}, got {}",
                MAX_LOOKBACK_DAYS, self.lookback_days
            ));
        }
        if !(0..=MAX_COOLDOWN_HOURS).contains(&self.cooldown_hours) {
            return invalid(format!(
                "ALERT_COOLDOWN_HOURS must be between 0 and {}, got {}",
                MAX_COOLDOWN_HOURS, self.cooldown_hours
            ));
        }
        if self.gateway_timeout_seconds == 0
            || self.gateway_timeout_seconds > MAX_GATEWAY_TIMEOUT_SECONDS
        {
            return invalid(format!(
                "GATEWAY_TIMEOUT_SECS must be between 1 and {}, got {}",
                MAX_GATEWAY_TIMEOUT_SECONDS, self.gateway_timeout_seconds
            ));
        }
        if self.polygon_rate_limit == 0 {
            return invalid("POLYGON_RATE_LIMIT must be greater than zero".to_string());
        }
        if !(0..=MAX_PRICE_CACHE_TTL_SECONDS).contains(&self.price_cache_ttl_seconds) {
            return invalid(format!(
                "PRICE_CACHE_TTL_SECS must be between 0 and {}, got {}",
                MAX_PRICE_CACHE_TTL_SECONDS, self.price_cache_ttl_seconds
            ));
        }
        if self.polygon_api_key.trim().is_empty() {
            return invalid("POLYGON_API_KEY is empty".to_string());
        }
        Ok(())
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::hours(self.cooldown_hours.clamp(0, MAX_COOLDOWN_HOURS))
    }

    pub fn price_cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(
            self.price_cache_ttl_seconds
                .clamp(0, MAX_PRICE_CACHE_TTL_SECONDS),
        )
    }
}
