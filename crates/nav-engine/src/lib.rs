//! Turns sparse disclosures into a dense daily series and prices the latest day as NAV.

pub mod nav;
pub mod series;

pub use nav::NavCalculator;
pub use series::{MetricSeriesFiller, SeriesFill, CASH_UNIT_MULTIPLIER};
