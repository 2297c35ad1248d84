pub mod amount;
pub mod api;
pub mod cache;
pub mod collector;
pub mod config;
pub mod db;
pub mod error;
pub mod history;
pub mod models;
pub mod multisig;
pub mod portfolio;
pub mod rate_limit;
pub mod sources;
pub mod state;
pub mod validation;

#[cfg(test)]
pub mod tests;

pub use api::error::ApiError;
pub use api::response::ApiResponse;
pub use api::route::create_router;
pub use db::{Store, StoreError};
pub use error::{Error, ErrorKind, Result};
pub use models::PortfolioSnapshot;
pub use validation::{parse_days, validate_bitcoin_address};
