use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use treasury_core::{DerivedDailyMetric, RawDailyPrice, RawDisclosure};

/// Disclosed cash figures are in millions.
pub const CASH_UNIT_MULTIPLIER: f64 = 1_000_000.0;

/// Output of one fill pass, with counters for the days that were left out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesFill {
    pub rows: Vec<DerivedDailyMetric>,
    pub skipped_no_price: usize,
    pub skipped_no_disclosure: usize,
    pub derivation_failures: usize,
}

/// Running forward-fill state, one slot per resolvable field.
#[derive(Debug, Default)]
struct FieldCarry {
    held_asset_quantity: Option<f64>,
    avg_acquisition_price: Option<f64>,
    cash_holdings: Option<f64>,
    staking_rewards: Option<f64>,
    concentration_per_mille: Option<f64>,
    notes: Option<String>,
    any_field_seen: bool,
}

/// Zero counts as "not disclosed" for these fields.
fn truthy(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v != 0.0 && !v.is_nan())
}

impl FieldCarry {
    fn absorb(&mut self, disclosure: &RawDisclosure) {
        if disclosure.has_any_field() {
            self.any_field_seen = true;
        }

        self.held_asset_quantity =
            truthy(disclosure.held_asset_quantity).or(self.held_asset_quantity);
        self.avg_acquisition_price =
            truthy(disclosure.avg_acquisition_price).or(self.avg_acquisition_price);
        self.cash_holdings = truthy(disclosure.cash_holdings).or(self.cash_holdings);
        self.staking_rewards = truthy(disclosure.staking_rewards).or(self.staking_rewards);
        // A disclosed zero concentration is kept so the share derivation can reject it.
        self.concentration_per_mille = disclosure
            .concentration_per_mille
            .filter(|v| !v.is_nan())
            .or(self.concentration_per_mille);

        if let Some(notes) = disclosure.notes.as_deref().filter(|n| !n.trim().is_empty()) {
            self.notes = Some(notes.to_string());
        }
    }

    /// `held / (concentration / 1000)`. `Err` when the quotient is not finite.
    fn shares_outstanding(&self) -> Result<Option<f64>, f64> {
        match (self.held_asset_quantity, self.concentration_per_mille) {
            (Some(held), Some(per_mille)) => {
                let shares = held / (per_mille / 1000.0);
                if shares.is_finite() {
                    Ok(Some(shares))
                } else {
                    Err(per_mille)
                }
            }
            _ => Ok(None),
        }
    }
}

/// Reconstructs a dense daily metric series from sparse disclosures and equity closes.
///
/// The fill is a pure function of its inputs and the `today` it was built with.
#[derive(Debug, Clone, Copy)]
pub struct MetricSeriesFiller {
    today: NaiveDate,
}

impl MetricSeriesFiller {
    pub fn new(today: NaiveDate) -> Self {
        Self { today }
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn fill(
        &self,
        disclosures: &[RawDisclosure],
        prices: &[RawDailyPrice],
        start_date: NaiveDate,
    ) -> Vec<DerivedDailyMetric> {
        self.fill_detailed(disclosures, prices, start_date).rows
    }

    pub fn fill_detailed(
        &self,
        disclosures: &[RawDisclosure],
        prices: &[RawDailyPrice],
        start_date: NaiveDate,
    ) -> SeriesFill {
        let mut out = SeriesFill::default();
        if disclosures.is_empty() || prices.is_empty() || start_date > self.today {
            return out;
        }

        let Some(company_id) = disclosures
            .iter()
            .map(|d| d.company_id.trim())
            .find(|id| !id.is_empty())
        else {
            tracing::warn!(
                "{} disclosures carry no company id, series left empty",
                disclosures.len()
            );
            return out;
        };

        let mut by_date: BTreeMap<NaiveDate, Vec<&RawDisclosure>> = BTreeMap::new();
        for disclosure in disclosures {
            by_date
                .entry(disclosure.effective_at.date_naive())
                .or_default()
                .push(disclosure);
        }

        let closes: BTreeMap<NaiveDate, f64> = prices
            .iter()
            .filter(|p| p.close.is_finite() && p.close > 0.0)
            .map(|p| (p.date, p.close))
            .collect();

        // Anything dated before the window still seeds the carries.
        let mut carry = FieldCarry::default();
        for (_, day_rows) in by_date.range(..start_date) {
            for disclosure in day_rows {
                carry.absorb(disclosure);
            }
        }
        let mut last_known_price = closes.range(..start_date).next_back().map(|(_, c)| *c);
        let mut last_nonzero_shares: Option<f64> = None;

        for day in start_date.iter_days().take_while(|d| *d <= self.today) {
            if let Some(close) = closes.get(&day) {
                last_known_price = Some(*close);
            }
            if let Some(day_rows) = by_date.get(&day) {
                for disclosure in day_rows {
                    carry.absorb(disclosure);
                }
            }

            let Some(price) = last_known_price else {
                out.skipped_no_price += 1;
                continue;
            };
            if !carry.any_field_seen {
                out.skipped_no_disclosure += 1;
                continue;
            }

            let shares_outstanding = match carry.shares_outstanding() {
                Ok(shares) => shares,
                Err(per_mille) => {
                    tracing::debug!(
                        "{} {}: concentration {} gives non-finite share count, day omitted",
                        company_id,
                        day,
                        per_mille
                    );
                    out.derivation_failures += 1;
                    continue;
                }
            };

            let issued_delta = shares_outstanding.map(|shares| match last_nonzero_shares {
                Some(previous) => shares - previous,
                None => shares,
            });
            if let Some(shares) = shares_outstanding.filter(|s| *s != 0.0) {
                last_nonzero_shares = Some(shares);
            }

            out.rows.push(DerivedDailyMetric {
                company_id: company_id.to_string(),
                date: day,
                equity_price: price,
                held_asset_quantity: carry.held_asset_quantity,
                avg_acquisition_price: carry.avg_acquisition_price,
                cash_holdings: carry.cash_holdings.map(|v| v * CASH_UNIT_MULTIPLIER),
                staking_rewards: carry.staking_rewards,
                concentration_per_mille: carry.concentration_per_mille,
                shares_outstanding,
                market_cap: shares_outstanding.map(|shares| price * shares),
                issued_delta,
                shares_bought_back_delta: issued_delta.map(|d| if d < 0.0 { -d } else { 0.0 }),
                notes: carry.notes.clone(),
            });
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    const COMPANY: &str = "mstr";

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    fn at(d: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, d, hour, 0, 0).unwrap()
    }

    fn disclosure(d: u32) -> RawDisclosure {
        RawDisclosure {
            company_id: COMPANY.to_string(),
            effective_at: at(d, 0),
            ..Default::default()
        }
    }

    fn price(d: u32, close: f64) -> RawDailyPrice {
        RawDailyPrice {
            company_id: COMPANY.to_string(),
            date: day(d),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1_000.0,
        }
    }

    fn filler() -> MetricSeriesFiller {
        MetricSeriesFiller::new(day(10))
    }

    #[test]
    fn test_empty_inputs_give_empty_series() {
        let f = filler();
        assert!(f.fill(&[], &[price(1, 10.0)], day(1)).is_empty());
        assert!(f.fill(&[disclosure(1)], &[], day(1)).is_empty());
    }

    #[test]
    fn test_start_after_today_is_empty() {
        let d = RawDisclosure {
            held_asset_quantity: Some(1.0),
            ..disclosure(1)
        };
        let f = MetricSeriesFiller::new(day(3));
        assert!(f.fill(&[d], &[price(1, 10.0)], day(4)).is_empty());
    }

    #[test]
    fn test_forward_fill_holdings() {
        let disclosures = vec![
            RawDisclosure {
                held_asset_quantity: Some(100.0),
                concentration_per_mille: Some(500.0),
                ..disclosure(1)
            },
            RawDisclosure {
                held_asset_quantity: Some(150.0),
                ..disclosure(5)
            },
        ];
        let rows = filler().fill(&disclosures, &[price(1, 20.0)], day(1));

        assert_eq!(rows.len(), 10);
        for row in &rows[1..4] {
            assert_eq!(row.held_asset_quantity, Some(100.0));
        }
        for row in &rows[4..] {
            assert_eq!(row.held_asset_quantity, Some(150.0));
            assert_eq!(row.concentration_per_mille, Some(500.0));
        }
        assert_eq!(rows[0].shares_outstanding, Some(200.0));
        assert_eq!(rows[4].shares_outstanding, Some(300.0));
        assert_eq!(rows[4].market_cap, Some(6_000.0));
    }

    #[test]
    fn test_derived_shares_match_formula_on_every_row() {
        let disclosures = vec![
            RawDisclosure {
                held_asset_quantity: Some(331.7),
                concentration_per_mille: Some(87.3),
                ..disclosure(1)
            },
            RawDisclosure {
                concentration_per_mille: Some(91.05),
                ..disclosure(4)
            },
            RawDisclosure {
                held_asset_quantity: Some(402.25),
                ..disclosure(7)
            },
        ];
        let prices = vec![price(1, 12.5), price(2, 13.0), price(6, 11.0)];
        let rows = filler().fill(&disclosures, &prices, day(1));

        assert!(!rows.is_empty());
        for row in &rows {
            let held = row.held_asset_quantity.unwrap();
            let per_mille = row.concentration_per_mille.unwrap();
            let expected = held / (per_mille / 1000.0);
            assert!((row.shares_outstanding.unwrap() - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_issued_delta_against_previous_emitted_day() {
        let disclosures = vec![
            RawDisclosure {
                held_asset_quantity: Some(100.0),
                concentration_per_mille: Some(500.0),
                ..disclosure(1)
            },
            RawDisclosure {
                held_asset_quantity: Some(150.0),
                ..disclosure(3)
            },
            RawDisclosure {
                held_asset_quantity: Some(120.0),
                ..disclosure(4)
            },
        ];
        let rows = filler().fill(&disclosures, &[price(1, 5.0)], day(1));

        // First emitted day counts its whole share count as newly issued.
        assert_eq!(rows[0].issued_delta, Some(200.0));
        assert_eq!(rows[1].issued_delta, Some(0.0));
        assert_eq!(rows[2].issued_delta, Some(100.0));
        assert_eq!(rows[3].issued_delta, Some(-60.0));
        assert_eq!(rows[3].shares_bought_back_delta, Some(60.0));
        assert_eq!(rows[2].shares_bought_back_delta, Some(0.0));
    }

    #[test]
    fn test_days_before_first_price_are_skipped() {
        let disclosures = vec![RawDisclosure {
            held_asset_quantity: Some(10.0),
            concentration_per_mille: Some(100.0),
            ..disclosure(1)
        }];
        let fill = filler().fill_detailed(&disclosures, &[price(3, 7.0)], day(1));

        assert_eq!(fill.rows.first().map(|r| r.date), Some(day(3)));
        assert_eq!(fill.skipped_no_price, 2);
        assert_eq!(fill.rows.len(), 8);
    }

    #[test]
    fn test_price_alone_does_not_emit_rows() {
        let disclosures = vec![RawDisclosure {
            held_asset_quantity: Some(10.0),
            concentration_per_mille: Some(100.0),
            ..disclosure(4)
        }];
        let fill = filler().fill_detailed(&disclosures, &[price(1, 7.0)], day(1));

        assert_eq!(fill.rows.first().map(|r| r.date), Some(day(4)));
        assert_eq!(fill.skipped_no_disclosure, 3);
        assert!(fill.rows.iter().all(|r| r.equity_price == 7.0));
    }

    #[test]
    fn test_zero_concentration_day_is_omitted() {
        let disclosures = vec![
            RawDisclosure {
                held_asset_quantity: Some(100.0),
                concentration_per_mille: Some(500.0),
                ..disclosure(1)
            },
            RawDisclosure {
                concentration_per_mille: Some(0.0),
                ..disclosure(3)
            },
            RawDisclosure {
                concentration_per_mille: Some(250.0),
                ..disclosure(5)
            },
        ];
        let fill = filler().fill_detailed(&disclosures, &[price(1, 1.0)], day(1));

        let dates: Vec<NaiveDate> = fill.rows.iter().map(|r| r.date).collect();
        assert!(!dates.contains(&day(3)));
        assert!(!dates.contains(&day(4)));
        assert_eq!(fill.derivation_failures, 2);
        assert!(fill
            .rows
            .iter()
            .all(|r| r.shares_outstanding.map_or(true, f64::is_finite)));

        let day5 = fill.rows.iter().find(|r| r.date == day(5)).unwrap();
        assert_eq!(day5.shares_outstanding, Some(400.0));
        // Compared against day 2, the last emitted day.
        assert_eq!(day5.issued_delta, Some(200.0));
    }

    #[test]
    fn test_zero_is_absent_for_forward_fill() {
        // Zero holdings or cash on a later disclosure do not overwrite the carried values.
        let disclosures = vec![
            RawDisclosure {
                held_asset_quantity: Some(100.0),
                concentration_per_mille: Some(500.0),
                cash_holdings: Some(2.5),
                staking_rewards: Some(3.0),
                ..disclosure(1)
            },
            RawDisclosure {
                held_asset_quantity: Some(0.0),
                cash_holdings: Some(0.0),
                staking_rewards: Some(0.0),
                ..disclosure(3)
            },
        ];
        let rows = filler().fill(&disclosures, &[price(1, 1.0)], day(1));

        let day3 = &rows[2];
        assert_eq!(day3.held_asset_quantity, Some(100.0));
        assert_eq!(day3.cash_holdings, Some(2_500_000.0));
        assert_eq!(day3.staking_rewards, Some(3.0));
    }

    #[test]
    fn test_cash_is_scaled_from_millions() {
        let disclosures = vec![RawDisclosure {
            cash_holdings: Some(0.5),
            ..disclosure(1)
        }];
        let rows = filler().fill(&disclosures, &[price(1, 1.0)], day(1));

        assert_eq!(rows[0].cash_holdings, Some(500_000.0));
        // No holdings or concentration: row still emitted, shares unresolved.
        assert_eq!(rows[0].shares_outstanding, None);
        assert_eq!(rows[0].market_cap, None);
        assert_eq!(rows[0].issued_delta, None);
    }

    #[test]
    fn test_time_of_day_is_discarded() {
        let disclosures = vec![RawDisclosure {
            effective_at: at(3, 23),
            held_asset_quantity: Some(10.0),
            concentration_per_mille: Some(10.0),
            ..disclosure(3)
        }];
        let rows = filler().fill(&disclosures, &[price(1, 2.0)], day(1));

        assert_eq!(rows[0].date, day(3));
    }

    #[test]
    fn test_history_before_start_seeds_carries() {
        let disclosures = vec![RawDisclosure {
            held_asset_quantity: Some(10.0),
            concentration_per_mille: Some(100.0),
            notes: Some("initial purchase".to_string()),
            ..disclosure(1)
        }];
        let rows = filler().fill(&disclosures, &[price(2, 4.0)], day(6));

        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].date, day(6));
        assert_eq!(rows[0].equity_price, 4.0);
        assert_eq!(rows[0].shares_outstanding, Some(100.0));
        assert_eq!(rows[0].notes.as_deref(), Some("initial purchase"));
    }

    #[test]
    fn test_series_is_dense_once_started() {
        let disclosures = vec![
            RawDisclosure {
                held_asset_quantity: Some(50.0),
                concentration_per_mille: Some(200.0),
                ..disclosure(2)
            },
            RawDisclosure {
                held_asset_quantity: Some(60.0),
                ..disclosure(8)
            },
        ];
        // Weekend gap in prices.
        let prices = vec![price(2, 3.0), price(3, 3.1), price(6, 3.2), price(7, 3.3)];
        let rows = filler().fill(&disclosures, &prices, day(1));

        assert_eq!(rows.first().map(|r| r.date), Some(day(2)));
        assert_eq!(rows.last().map(|r| r.date), Some(day(10)));
        for pair in rows.windows(2) {
            assert_eq!(pair[1].date, pair[0].date.succ_opt().unwrap());
        }
        assert_eq!(rows[3].equity_price, 3.1);
    }

    #[test]
    fn test_missing_company_id_skips_everything() {
        let disclosures = vec![RawDisclosure {
            company_id: "  ".to_string(),
            held_asset_quantity: Some(1.0),
            ..disclosure(1)
        }];
        assert!(filler()
            .fill(&disclosures, &[price(1, 1.0)], day(1))
            .is_empty());
    }

    #[test]
    fn test_fill_is_deterministic() {
        let disclosures = vec![RawDisclosure {
            held_asset_quantity: Some(7.0),
            concentration_per_mille: Some(3.0),
            ..disclosure(1)
        }];
        let prices = vec![price(1, 9.0), price(5, 9.5)];
        let f = filler();
        assert_eq!(
            f.fill(&disclosures, &prices, day(1)),
            f.fill(&disclosures, &prices, day(1))
        );
    }
}
