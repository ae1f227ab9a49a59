use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TreasuryError {
    /// No usable live price for the equity or the underlying asset.
    #[error("Missing price data: {0}")]
    MissingPriceData(String),

    /// The derived series has no resolvable holdings, shares or cash for the latest day.
    #[error("Missing metric data: {0}")]
    MissingMetricData(String),

    /// Total NAV came out non-positive or non-finite. Points at bad upstream data.
    #[error("Invalid NAV: {0}")]
    InvalidNav(String),

    #[error("Store write failed: {0}")]
    StoreWriteFailure(String),

    #[error("Store read failed: {0}")]
    StoreReadFailure(String),

    #[error("Price gateway error: {0}")]
    PriceGateway(String),

    /// A setting is outside the range the pipeline can compute with.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl TreasuryError {
    /// True for the two failures the NAV calculator reports when an input is absent.
    pub fn is_missing_inputs(&self) -> bool {
        matches!(
            self,
            TreasuryError::MissingPriceData(_) | TreasuryError::MissingMetricData(_)
        )
    }
}
