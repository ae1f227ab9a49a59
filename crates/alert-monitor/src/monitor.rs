use chrono::{DateTime, Duration, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use treasury_core::{AlertRule, AlertRuleStore, Clock, NavSource, TreasuryError, TriggerEvent};

pub const DEFAULT_COOLDOWN_HOURS: i64 = 6;
pub const DEFAULT_MAX_CONCURRENT_COMPANIES: usize = 4;

/// Outcome of evaluating every rule that points at one company.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompanyEvaluation {
    pub company_id: String,
    pub mnav: Option<f64>,
    pub fired: Vec<i64>,
    pub error: Option<String>,
}

impl CompanyEvaluation {
    fn new(company_id: &str) -> Self {
        Self {
            company_id: company_id.to_string(),
            mnav: None,
            fired: Vec::new(),
            error: None,
        }
    }
}

/// Summary of one monitor invocation, ordered by company id.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorReport {
    pub started_at: DateTime<Utc>,
    pub rules_evaluated: usize,
    pub evaluations: Vec<CompanyEvaluation>,
}

impl MonitorReport {
    pub fn fired_count(&self) -> usize {
        self.evaluations.iter().map(|e| e.fired.len()).sum()
    }

    pub fn failed_groups(&self) -> usize {
        self.evaluations.iter().filter(|e| e.error.is_some()).count()
    }

    pub fn log_summary(&self) {
        tracing::info!(
            "Monitor cycle: {} rules across {} companies, {} fired, {} failed groups",
            self.rules_evaluated,
            self.evaluations.len(),
            self.fired_count(),
            self.failed_groups()
        );
        for eval in &self.evaluations {
            match (&eval.mnav, &eval.error) {
                (Some(mnav), None) => {
                    tracing::debug!("  {}: mNAV {:.4}, fired {:?}", eval.company_id, mnav, eval.fired)
                }
                (_, Some(err)) => tracing::debug!("  {}: {}", eval.company_id, err),
                (None, None) => {}
            }
        }
    }
}

/// Evaluates mNAV threshold rules and fires notifications outside the cooldown window.
pub struct AlertMonitor {
    rules: Arc<dyn AlertRuleStore>,
    nav: Arc<dyn NavSource>,
    clock: Arc<dyn Clock>,
    cooldown: Duration,
    max_concurrent: usize,
}

impl AlertMonitor {
    pub fn new(
        rules: Arc<dyn AlertRuleStore>,
        nav: Arc<dyn NavSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rules,
            nav,
            clock,
            cooldown: Duration::hours(DEFAULT_COOLDOWN_HOURS),
            max_concurrent: DEFAULT_MAX_CONCURRENT_COMPANIES,
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// One pass over every active rule.
    ///
    /// Only a failure to list the rules fails the cycle. Anything that goes wrong for a
    /// single company is reported on that company's evaluation.
    pub async fn run_cycle(&self) -> Result<MonitorReport, TreasuryError> {
        let started_at = self.clock.now();
        let active = self.rules.list_active_rules().await?;
        let rules_evaluated = active.len();

        let mut groups: BTreeMap<String, Vec<AlertRule>> = BTreeMap::new();
        for rule in active {
            groups.entry(rule.company_id.clone()).or_default().push(rule);
        }

        tracing::info!(
            "Evaluating {} rules for {} companies (max {} concurrent)",
            rules_evaluated,
            groups.len(),
            self.max_concurrent
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let evaluations = join_all(groups.iter().map(|(company_id, rules)| {
            let sem = Arc::clone(&semaphore);
            async move {
                match sem.acquire().await {
                    Ok(_permit) => self.evaluate_company(company_id, rules).await,
                    Err(e) => {
                        let mut eval = CompanyEvaluation::new(company_id);
                        eval.error = Some(format!("worker pool closed: {}", e));
                        eval
                    }
                }
            }
        }))
        .await;

        Ok(MonitorReport {
            started_at,
            rules_evaluated,
            evaluations,
        })
    }

    async fn evaluate_company(&self, company_id: &str, rules: &[AlertRule]) -> CompanyEvaluation {
        let mut eval = CompanyEvaluation::new(company_id);

        let snapshot = match self.nav.current_nav(company_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                match &e {
                    TreasuryError::InvalidNav(_) => {
                        tracing::error!("Skipping {} rules for {}: {}", rules.len(), company_id, e)
                    }
                    _ => tracing::warn!("Skipping {} rules for {}: {}", rules.len(), company_id, e),
                }
                eval.error = Some(e.to_string());
                return eval;
            }
        };
        let mnav = snapshot.mnav;
        eval.mnav = Some(mnav);

        let now = self.clock.now();
        let Some(cutoff) = now.checked_sub_signed(self.cooldown) else {
            let e = TreasuryError::Configuration(format!(
                "cooldown of {} hours before {} is out of range",
                self.cooldown.num_hours(),
                now
            ));
            tracing::error!("Skipping {} rules for {}: {}", rules.len(), company_id, e);
            eval.error = Some(e.to_string());
            return eval;
        };

        for rule in rules {
            if !rule.is_crossed_by(mnav) {
                continue;
            }

            if rule.is_cooling(now, self.cooldown) {
                tracing::debug!(
                    "Alert {} for {} crossed ({:.4} {} {}) but is cooling down",
                    rule.id,
                    company_id,
                    mnav,
                    rule.direction,
                    rule.threshold
                );
                continue;
            }

            let event = TriggerEvent::for_rule(rule, mnav, now);
            match self.rules.trigger_if_cooled(&event, cutoff).await {
                Ok(Some(notification_id)) => {
                    tracing::info!(
                        "Alert {} fired for {} (user {}): mNAV {:.4} {} {} [notification {}]",
                        rule.id,
                        company_id,
                        rule.user_id,
                        mnav,
                        rule.direction,
                        rule.threshold,
                        notification_id
                    );
                    eval.fired.push(rule.id);
                }
                Ok(None) => {
                    tracing::debug!(
                        "Alert {} for {} already fired by another run",
                        rule.id,
                        company_id
                    );
                }
                Err(e) => {
                    tracing::error!("Failed to fire alert {} for {}: {}", rule.id, company_id, e);
                    eval.error = Some(e.to_string());
                }
            }
        }

        eval
    }
}
