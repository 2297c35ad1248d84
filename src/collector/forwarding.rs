use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::db::Store;
use crate::error::Result;
use crate::models::{ForwardingEvent, SECONDS_PER_DAY};
use crate::sources::LightningNodeAdapter;

/// Copies routed payments from the Lightning node into the store.
///
/// The position in the node's history lives in memory only. It starts one
/// day back, so a restart after a longer outage needs a [`catchup`].
///
/// [`catchup`]: ForwardingCollector::catchup
pub struct ForwardingCollector {
    store: Store,
    node: Arc<LightningNodeAdapter>,
    interval: Duration,
    last_timestamp: i64,
}

impl ForwardingCollector {
    pub fn new(store: Store, node: Arc<LightningNodeAdapter>, interval: Duration) -> Self {
        Self {
            store,
            node,
            interval,
            last_timestamp: chrono::Utc::now().timestamp() - SECONDS_PER_DAY,
        }
    }

    pub fn last_timestamp(&self) -> i64 {
        self.last_timestamp
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Starting forwarding collector (every {:?})", self.interval);
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(0) => debug!("No new forwarding events"),
                        Ok(count) => info!("Stored {} new forwarding events", count),
                        Err(e) => error!("Forwarding collection failed: {}", e),
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Shutting down forwarding collector");
                    break;
                }
            }
        }
    }

    /// Fetch events since the last seen one and store the new ones.
    pub async fn tick(&mut self) -> Result<usize> {
        let now = chrono::Utc::now().timestamp();
        let events = self.node.forwarding_history(self.last_timestamp, now).await?;
        let inserted = self.store_events(&events).await?;

        if let Some(newest) = events.iter().map(|e| e.timestamp).max() {
            self.last_timestamp = self.last_timestamp.max(newest);
        }
        Ok(inserted)
    }

    /// Replay the last `days` days of history. Events already stored are
    /// skipped; returns how many were new.
    pub async fn catchup(&self, days: u32) -> Result<usize> {
        let now = chrono::Utc::now().timestamp();
        let start = now - i64::from(days) * SECONDS_PER_DAY;
        info!("Catching up forwarding events for the last {} days", days);

        let events = self.node.forwarding_history(start, now).await?;
        let inserted = self.store_events(&events).await?;
        info!(
            "Catch-up done: {} events fetched, {} new, {} stored in total",
            events.len(),
            inserted,
            self.store.count_forwarding_events().await?
        );
        Ok(inserted)
    }

    async fn store_events(&self, events: &[ForwardingEvent]) -> Result<usize> {
        let mut inserted = 0;
        for event in events {
            if self.store.insert_forwarding_event_ignore_duplicate(event).await? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}
