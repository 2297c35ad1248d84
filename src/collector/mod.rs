//! Long-running collection loops.
//!
//! Every collector is consumed by `run`, performs a pass immediately and then
//! once per interval until the shutdown token fires. A failed pass is logged
//! and retried on the next tick.

pub mod forwarding;
pub mod onchain;
pub mod portfolio;
pub mod strike;

pub use forwarding::ForwardingCollector;
pub use onchain::{BalanceFetcher, OnchainCollector, OnchainSettings, TickSummary, Via};
pub use portfolio::PortfolioCollector;
pub use strike::StrikeCollector;
