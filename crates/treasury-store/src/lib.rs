pub mod alerts;
pub mod db;
pub mod metrics;
pub mod models;

pub use alerts::AlertManager;
pub use db::TreasuryDb;
pub use metrics::MetricRepository;
pub use models::*;
