use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::BalanceCache;
use crate::collector::BalanceFetcher;
use crate::db::Store;
use crate::error::Result;
use crate::history::HistoryReconstructor;
use crate::models::{AddressObservation, PortfolioSnapshot};
use crate::sources::{LightningNodeAdapter, SourceError};

/// Longest time `current_snapshot` waits for address lookups.
pub const SNAPSHOT_DEADLINE: Duration = Duration::from_secs(10);

/// Fuses every custody surface into one snapshot.
pub struct PortfolioAggregator {
    store: Store,
    cache: Arc<BalanceCache>,
    fetcher: BalanceFetcher,
    lightning: Option<Arc<LightningNodeAdapter>>,
    history: Arc<HistoryReconstructor>,
    deadline: Duration,
    shutdown: CancellationToken,
}

impl PortfolioAggregator {
    pub fn new(
        store: Store,
        cache: Arc<BalanceCache>,
        fetcher: BalanceFetcher,
        lightning: Option<Arc<LightningNodeAdapter>>,
        history: Arc<HistoryReconstructor>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            cache,
            fetcher,
            lightning,
            history,
            deadline: SNAPSHOT_DEADLINE,
            shutdown,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn reconstructor(&self) -> &Arc<HistoryReconstructor> {
        &self.history
    }

    /// Balances of every active address, looked up concurrently. Lookups
    /// still running at the deadline are abandoned and their results dropped.
    pub async fn address_balances(&self) -> Result<Vec<AddressObservation>> {
        let addresses = self.store.get_active_addresses().await?;
        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        let expected = addresses.len();
        let (results_tx, mut results) = mpsc::channel::<AddressObservation>(expected);
        let (errors_tx, mut errors) = mpsc::channel::<(String, SourceError)>(expected);
        let lookups = self.shutdown.child_token();

        for watched in addresses {
            let cache = self.cache.clone();
            let fetcher = self.fetcher.clone();
            let results_tx = results_tx.clone();
            let errors_tx = errors_tx.clone();
            let cancel = lookups.clone();

            tokio::spawn(async move {
                let address = watched.address;
                if let Some(cached) = cache.get(&address).await {
                    if results_tx.send(cached).await.is_err() {
                        debug!("Dropping late cached balance for {}", address);
                    }
                    return;
                }

                match fetcher.fetch(&address, &cancel).await {
                    Ok((observation, _)) => {
                        cache.set(observation.clone()).await;
                        if results_tx.send(observation).await.is_err() {
                            warn!("Balance for {} arrived after the snapshot deadline", address);
                        }
                    }
                    Err(e) => {
                        if errors_tx.send((address.clone(), e)).await.is_err() {
                            debug!("Dropping late failure for {}", address);
                        }
                    }
                }
            });
        }
        drop(results_tx);
        drop(errors_tx);

        let mut observations = Vec::with_capacity(expected);
        let mut failed = 0usize;
        let deadline = tokio::time::sleep(self.deadline);
        tokio::pin!(deadline);

        while observations.len() + failed < expected {
            tokio::select! {
                Some(observation) = results.recv() => observations.push(observation),
                Some((address, e)) = errors.recv() => {
                    failed += 1;
                    if e.is_cancelled() {
                        debug!("Balance lookup for {} cancelled", address);
                    } else {
                        warn!("Balance for {} unavailable: {}", address, e);
                    }
                }
                _ = &mut deadline => {
                    warn!(
                        "Snapshot deadline of {:?} reached with {} of {} addresses outstanding",
                        self.deadline,
                        expected - observations.len() - failed,
                        expected
                    );
                    break;
                }
                else => break,
            }
        }
        lookups.cancel();

        Ok(observations)
    }

    /// The portfolio as of now. Sources that cannot be read contribute zero.
    pub async fn current_snapshot(&self) -> Result<PortfolioSnapshot> {
        let mut snapshot = PortfolioSnapshot::empty(chrono::Utc::now().timestamp());

        let observations = self.address_balances().await?;
        snapshot.tracked_addresses = observations.iter().map(|o| o.balance).sum();
        snapshot.cold_storage = self.store.get_cold_storage_total().await?;

        if let Some(node) = &self.lightning {
            match node.channel_balance().await {
                Ok(channels) => {
                    snapshot.lightning_local = channels.local;
                    snapshot.lightning_remote = channels.remote;
                }
                Err(e) => warn!("Lightning channel balance unavailable: {}", e),
            }
            match node.wallet_balance().await {
                Ok(wallet) => {
                    snapshot.onchain_confirmed = wallet.confirmed;
                    snapshot.onchain_unconfirmed = wallet.unconfirmed;
                }
                Err(e) => warn!("Lightning wallet balance unavailable: {}", e),
            }
        }

        snapshot.recompute_totals();
        info!(
            "Portfolio snapshot: {} sats liquid, {} sats total ({} addresses)",
            snapshot.total_liquid,
            snapshot.total_portfolio,
            observations.len()
        );
        Ok(snapshot)
    }

    pub async fn history(&self, from: i64, to: i64) -> Result<Vec<PortfolioSnapshot>> {
        self.history.portfolio_history(from, to).await
    }
}
