pub mod clock;
pub mod error;
pub mod price_cache;
pub mod traits;
pub mod types;

pub use clock::*;
pub use error::*;
pub use price_cache::CachedPriceGateway;
pub use traits::*;
pub use types::*;
