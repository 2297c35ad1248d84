use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::db::Store;
use crate::error::Result;
use crate::models::PortfolioSnapshot;
use crate::portfolio::PortfolioAggregator;

/// Persists a portfolio snapshot every interval.
pub struct PortfolioCollector {
    store: Store,
    aggregator: Arc<PortfolioAggregator>,
    interval: Duration,
}

impl PortfolioCollector {
    pub fn new(store: Store, aggregator: Arc<PortfolioAggregator>, interval: Duration) -> Self {
        Self {
            store,
            aggregator,
            interval,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!("Starting portfolio collector (every {:?})", self.interval);
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("Portfolio snapshot failed: {}", e);
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Shutting down portfolio collector");
                    break;
                }
            }
        }
    }

    pub async fn tick(&self) -> Result<PortfolioSnapshot> {
        let snapshot = self.aggregator.current_snapshot().await?;
        self.store.insert_balance_snapshot(&snapshot).await?;
        Ok(snapshot)
    }
}
