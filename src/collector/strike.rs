use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::db::Store;
use crate::error::Result;
use crate::sources::StrikeAdapter;

/// Stores Strike account balances every interval.
pub struct StrikeCollector {
    store: Store,
    adapter: StrikeAdapter,
    interval: Duration,
}

impl StrikeCollector {
    pub fn new(store: Store, adapter: StrikeAdapter, interval: Duration) -> Self {
        Self {
            store,
            adapter,
            interval,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!("Starting Strike collector (every {:?})", self.interval);
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(count) => debug!("Stored {} Strike balances", count),
                        Err(e) => error!("Strike collection failed: {}", e),
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Shutting down Strike collector");
                    break;
                }
            }
        }
    }

    /// Fetch and store every currency balance under one timestamp.
    pub async fn tick(&self) -> Result<usize> {
        let balances = self.adapter.balances().await?;
        let timestamp = chrono::Utc::now().timestamp();
        for balance in &balances {
            self.store.insert_strike_balance(timestamp, balance).await?;
            info!(
                "Strike {}: {} available, {} total",
                balance.currency, balance.available, balance.total
            );
        }
        Ok(balances.len())
    }
}
