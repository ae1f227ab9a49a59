use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite};
use std::sync::Arc;
use treasury_core::{
    AlertDirection, AlertRule, AlertRuleStore, Clock, NotificationRecord, NotificationSink,
    SystemClock, TreasuryError, TriggerEvent,
};

use crate::db::{to_db_timestamp, TreasuryDb};
use crate::models::*;

/// Alert rules and the notification records they produce.
#[derive(Clone)]
pub struct AlertManager {
    db: TreasuryDb,
    clock: Arc<dyn Clock>,
}

async fn insert_notification<'e, E>(executor: E, event: &TriggerEvent) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO alert_notifications
        (alert_id, company_id, measured_mnav, threshold, direction, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(event.alert_id)
    .bind(&event.company_id)
    .bind(event.measured_mnav)
    .bind(event.threshold)
    .bind(event.direction.as_str())
    .bind(to_db_timestamp(event.triggered_at))
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

impl AlertManager {
    pub fn new(db: TreasuryDb) -> Self {
        Self {
            db,
            clock: Arc::new(SystemClock),
        }
    }

    /// Clock used to stamp notifications recorded through `NotificationSink`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Create a new alert rule
    pub async fn create_rule(&self, rule: &AlertRuleInput) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO alert_rules (user_id, company_id, threshold, direction)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&rule.user_id)
        .bind(&rule.company_id)
        .bind(rule.threshold)
        .bind(rule.direction.as_str())
        .fetch_one(self.db.pool())
        .await?;

        Ok(id)
    }

    /// Get alert rule by ID
    pub async fn get_rule(&self, id: i64) -> Result<Option<AlertRule>> {
        let row = sqlx::query_as::<_, AlertRuleRow>(
            r#"
            SELECT id, user_id, company_id, threshold, direction, is_active, last_triggered_at
            FROM alert_rules WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(AlertRule::try_from).transpose()
    }

    /// Get all active rules, grouped by company
    pub async fn active_rules(&self) -> Result<Vec<AlertRule>> {
        let rows = sqlx::query_as::<_, AlertRuleRow>(
            r#"
            SELECT id, user_id, company_id, threshold, direction, is_active, last_triggered_at
            FROM alert_rules
            WHERE is_active = 1
            ORDER BY company_id, id
            "#,
        )
        .fetch_all(self.db.pool())
        .await?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            // One corrupt row should not hide every other rule.
            let id = row.id;
            match AlertRule::try_from(row) {
                Ok(rule) => rules.push(rule),
                Err(e) => tracing::warn!("Skipping unreadable alert rule {}: {:#}", id, e),
            }
        }
        Ok(rules)
    }

    /// Deactivate a rule. Returns false when no such rule exists.
    pub async fn deactivate_rule(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE alert_rules SET is_active = 0 WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Unconditionally stamp the last trigger time
    pub async fn set_last_triggered(&self, id: i64, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query("UPDATE alert_rules SET last_triggered_at = ? WHERE id = ?")
            .bind(to_db_timestamp(at))
            .bind(id)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Stamp and record in one transaction, only if the rule is outside its cooldown.
    pub async fn trigger_in_transaction(
        &self,
        event: &TriggerEvent,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        let mut tx = self.db.pool().begin().await?;

        let claimed = sqlx::query(
            r#"
            UPDATE alert_rules
            SET last_triggered_at = ?
            WHERE id = ?
              AND is_active = 1
              AND (last_triggered_at IS NULL OR last_triggered_at < ?)
            "#,
        )
        .bind(to_db_timestamp(event.triggered_at))
        .bind(event.alert_id)
        .bind(to_db_timestamp(cutoff))
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        // Dropping the transaction on error rolls the stamp back.
        let notification_id = insert_notification(&mut *tx, event).await?;
        tx.commit().await?;

        Ok(Some(notification_id))
    }

    /// Notifications produced by one rule, newest first
    pub async fn notifications_for_alert(&self, alert_id: i64) -> Result<Vec<NotificationRecord>> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT id, alert_id, company_id, measured_mnav, threshold, direction,
                   created_at, email_sent, chat_sent
            FROM alert_notifications
            WHERE alert_id = ?
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(alert_id)
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(NotificationRecord::try_from).collect()
    }
}

fn write_failure(e: anyhow::Error) -> TreasuryError {
    TreasuryError::StoreWriteFailure(format!("{:#}", e))
}

#[async_trait]
impl AlertRuleStore for AlertManager {
    async fn list_active_rules(&self) -> Result<Vec<AlertRule>, TreasuryError> {
        self.active_rules()
            .await
            .map_err(|e| TreasuryError::StoreReadFailure(format!("{:#}", e)))
    }

    async fn mark_triggered(&self, rule_id: i64, at: DateTime<Utc>) -> Result<(), TreasuryError> {
        match self.set_last_triggered(rule_id, at).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(TreasuryError::StoreWriteFailure(format!(
                "alert rule {} not found",
                rule_id
            ))),
            Err(e) => Err(write_failure(e)),
        }
    }

    async fn trigger_if_cooled(
        &self,
        event: &TriggerEvent,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<i64>, TreasuryError> {
        self.trigger_in_transaction(event, cutoff)
            .await
            .map_err(write_failure)
    }
}

#[async_trait]
impl NotificationSink for AlertManager {
    async fn record(
        &self,
        alert_id: i64,
        company_id: &str,
        measured_value: f64,
        threshold: f64,
        direction: AlertDirection,
    ) -> Result<i64, TreasuryError> {
        let event = TriggerEvent {
            alert_id,
            company_id: company_id.to_string(),
            measured_mnav: measured_value,
            threshold,
            direction,
            triggered_at: self.clock.now(),
        };
        insert_notification(self.db.pool(), &event)
            .await
            .map_err(write_failure)
    }
}
