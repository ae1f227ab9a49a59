//! mNAV threshold monitoring over the per-company NAV pipeline.

pub mod config;
pub mod monitor;
pub mod nav_service;

pub use config::MonitorConfig;
pub use monitor::{AlertMonitor, CompanyEvaluation, MonitorReport};
pub use nav_service::CompanyNavService;
