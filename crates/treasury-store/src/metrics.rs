use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use treasury_core::{
    CompanyDirectory, CompanyProfile, MetricStore, RawDailyPrice, RawDisclosure, TreasuryError,
};

use crate::db::{to_db_timestamp, TreasuryDb};
use crate::models::*;

/// Companies, disclosures and daily equity prices.
#[derive(Clone)]
pub struct MetricRepository {
    db: TreasuryDb,
}

impl MetricRepository {
    pub fn new(db: TreasuryDb) -> Self {
        Self { db }
    }

    /// Insert or update a company
    pub async fn upsert_company(&self, company: &CompanyInput) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO companies (id, name, ticker, asset_ticker, other_assets_value)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                ticker = excluded.ticker,
                asset_ticker = excluded.asset_ticker,
                other_assets_value = excluded.other_assets_value
            "#,
        )
        .bind(&company.id)
        .bind(&company.name)
        .bind(&company.ticker)
        .bind(&company.asset_ticker)
        .bind(company.other_assets_value.unwrap_or(0.0))
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    pub async fn list_companies(&self) -> Result<Vec<CompanyRow>> {
        let rows = sqlx::query_as::<_, CompanyRow>(
            "SELECT id, name, ticker, asset_ticker, other_assets_value FROM companies ORDER BY id",
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows)
    }

    /// Record a disclosure row
    pub async fn insert_disclosure(&self, disclosure: &RawDisclosure) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO disclosures
            (company_id, effective_at, held_asset_quantity, avg_acquisition_price,
             cash_holdings, staking_rewards, concentration_per_mille, notes)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&disclosure.company_id)
        .bind(to_db_timestamp(disclosure.effective_at))
        .bind(disclosure.held_asset_quantity)
        .bind(disclosure.avg_acquisition_price)
        .bind(disclosure.cash_holdings)
        .bind(disclosure.staking_rewards)
        .bind(disclosure.concentration_per_mille)
        .bind(&disclosure.notes)
        .execute(self.db.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Insert a daily bar, replacing any existing bar for the same day
    pub async fn upsert_daily_price(&self, price: &RawDailyPrice) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO daily_prices (company_id, date, open, high, low, close, volume)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(company_id, date) DO UPDATE SET
                open = excluded.open,
                high = excluded.high,
                low = excluded.low,
                close = excluded.close,
                volume = excluded.volume
            "#,
        )
        .bind(&price.company_id)
        .bind(price.date.format("%Y-%m-%d").to_string())
        .bind(price.open)
        .bind(price.high)
        .bind(price.low)
        .bind(price.close)
        .bind(price.volume)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    pub async fn disclosures(
        &self,
        company_id: &str,
        from: Option<NaiveDate>,
    ) -> Result<Vec<RawDisclosure>> {
        let rows = match from {
            // Timestamps start with the date, so a bare date is a valid lower bound.
            Some(from) => {
                sqlx::query_as::<_, DisclosureRow>(
                    r#"
                    SELECT id, company_id, effective_at, held_asset_quantity, avg_acquisition_price,
                           cash_holdings, staking_rewards, concentration_per_mille, notes
                    FROM disclosures
                    WHERE company_id = ? AND effective_at >= ?
                    ORDER BY effective_at ASC, id ASC
                    "#,
                )
                .bind(company_id)
                .bind(from.format("%Y-%m-%d").to_string())
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query_as::<_, DisclosureRow>(
                    r#"
                    SELECT id, company_id, effective_at, held_asset_quantity, avg_acquisition_price,
                           cash_holdings, staking_rewards, concentration_per_mille, notes
                    FROM disclosures
                    WHERE company_id = ?
                    ORDER BY effective_at ASC, id ASC
                    "#,
                )
                .bind(company_id)
                .fetch_all(self.db.pool())
                .await?
            }
        };

        rows.into_iter().map(RawDisclosure::try_from).collect()
    }

    pub async fn daily_prices(
        &self,
        company_id: &str,
        from: Option<NaiveDate>,
    ) -> Result<Vec<RawDailyPrice>> {
        let from = from
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let rows = sqlx::query_as::<_, DailyPriceRow>(
            r#"
            SELECT company_id, date, open, high, low, close, volume
            FROM daily_prices
            WHERE company_id = ? AND date >= ?
            ORDER BY date ASC
            "#,
        )
        .bind(company_id)
        .bind(from)
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(RawDailyPrice::try_from).collect()
    }

    pub async fn company(&self, company_id: &str) -> Result<Option<CompanyRow>> {
        let row = sqlx::query_as::<_, CompanyRow>(
            "SELECT id, name, ticker, asset_ticker, other_assets_value FROM companies WHERE id = ?",
        )
        .bind(company_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row)
    }
}

fn read_failure(e: anyhow::Error) -> TreasuryError {
    TreasuryError::StoreReadFailure(format!("{:#}", e))
}

#[async_trait]
impl MetricStore for MetricRepository {
    async fn get_disclosures(
        &self,
        company_id: &str,
        from: Option<NaiveDate>,
    ) -> Result<Vec<RawDisclosure>, TreasuryError> {
        self.disclosures(company_id, from).await.map_err(read_failure)
    }

    async fn get_daily_prices(
        &self,
        company_id: &str,
        from: Option<NaiveDate>,
    ) -> Result<Vec<RawDailyPrice>, TreasuryError> {
        self.daily_prices(company_id, from).await.map_err(read_failure)
    }
}

#[async_trait]
impl CompanyDirectory for MetricRepository {
    async fn get_company(&self, company_id: &str) -> Result<Option<CompanyProfile>, TreasuryError> {
        Ok(self
            .company(company_id)
            .await
            .map_err(read_failure)?
            .map(CompanyProfile::from))
    }

    async fn other_assets_value(&self, company_id: &str) -> Result<f64, TreasuryError> {
        Ok(self
            .company(company_id)
            .await
            .map_err(read_failure)?
            .map(|c| c.other_assets_value)
            .unwrap_or(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Utc};

    async fn setup_test_repo() -> MetricRepository {
        let db = TreasuryDb::new("sqlite::memory:").await.unwrap();
        MetricRepository::new(db)
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, d).unwrap()
    }

    fn bar(d: u32, close: f64) -> RawDailyPrice {
        RawDailyPrice {
            company_id: "sbet".to_string(),
            date: day(d),
            open: close,
            high: close,
            low: close,
            close,
            volume: 500.0,
        }
    }

    #[tokio::test]
    async fn test_disclosures_round_trip_in_date_order() {
        let repo = setup_test_repo().await;

        for (d, held) in [(9, Some(200.0)), (2, Some(100.0)), (5, None)] {
            repo.insert_disclosure(&RawDisclosure {
                company_id: "sbet".to_string(),
                effective_at: Utc.with_ymd_and_hms(2025, 4, d, 16, 30, 0).unwrap(),
                held_asset_quantity: held,
                notes: Some(format!("filing {}", d)),
                ..Default::default()
            })
            .await
            .unwrap();
        }

        let all = repo.get_disclosures("sbet", None).await.unwrap();
        let days: Vec<u32> = all
            .iter()
            .map(|d| d.effective_at.day())
            .collect();
        assert_eq!(days, vec![2, 5, 9]);
        assert_eq!(all[1].held_asset_quantity, None);
        assert_eq!(all[0].held_asset_quantity, Some(100.0));

        // Same-day rows are included by a date lower bound.
        let recent = repo.get_disclosures("sbet", Some(day(5))).await.unwrap();
        assert_eq!(recent.len(), 2);

        assert!(repo.get_disclosures("other", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_daily_prices_upsert_and_filter() {
        let repo = setup_test_repo().await;

        repo.upsert_daily_price(&bar(3, 10.0)).await.unwrap();
        repo.upsert_daily_price(&bar(1, 9.0)).await.unwrap();
        repo.upsert_daily_price(&bar(3, 10.5)).await.unwrap();

        let prices = repo.get_daily_prices("sbet", None).await.unwrap();
        assert_eq!(prices.len(), 2);
        assert_eq!(prices[0].date, day(1));
        assert_eq!(prices[1].close, 10.5);

        let recent = repo.get_daily_prices("sbet", Some(day(2))).await.unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[tokio::test]
    async fn test_company_directory() {
        let repo = setup_test_repo().await;

        repo.upsert_company(&CompanyInput {
            id: "sbet".to_string(),
            name: "SharpLink Gaming".to_string(),
            ticker: "SBET".to_string(),
            asset_ticker: "X:ETHUSD".to_string(),
            other_assets_value: Some(12_000_000.0),
        })
        .await
        .unwrap();

        let profile = repo.get_company("sbet").await.unwrap().unwrap();
        assert_eq!(profile.asset_ticker, "X:ETHUSD");
        assert_eq!(repo.other_assets_value("sbet").await.unwrap(), 12_000_000.0);

        assert!(repo.get_company("nope").await.unwrap().is_none());
        assert_eq!(repo.other_assets_value("nope").await.unwrap(), 0.0);
        assert_eq!(repo.list_companies().await.unwrap().len(), 1);
    }
}
