use std::sync::Arc;
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::BalanceCache;
use crate::config::Config;
use crate::db::Store;
use crate::models::{AddressBalance, AddressObservation, WatchedAddress};
use crate::sources::{AddressSource, SourceError};

/// Which adapter answered a balance request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Via {
    Node,
    Fallback,
}

/// Node-first balance lookup with a retried HTTP fallback.
#[derive(Clone)]
pub struct BalanceFetcher {
    node: Option<Arc<dyn AddressSource>>,
    fallback: Arc<dyn AddressSource>,
    retry_limit: u32,
    retry_delay: Duration,
}

impl BalanceFetcher {
    /// `retry_limit` counts every fallback attempt, the first one included.
    pub fn new(
        node: Option<Arc<dyn AddressSource>>,
        fallback: Arc<dyn AddressSource>,
        retry_limit: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            node,
            fallback,
            retry_limit: retry_limit.max(1),
            retry_delay,
        }
    }

    pub fn node(&self) -> Option<&Arc<dyn AddressSource>> {
        self.node.as_ref()
    }

    pub fn fallback(&self) -> &Arc<dyn AddressSource> {
        &self.fallback
    }

    /// The adapter history reconstruction should read transactions from.
    pub fn preferred(&self) -> Arc<dyn AddressSource> {
        self.node.clone().unwrap_or_else(|| self.fallback.clone())
    }

    pub async fn fetch(
        &self,
        address: &str,
        cancel: &CancellationToken,
    ) -> Result<(AddressObservation, Via), SourceError> {
        if let Some(node) = &self.node {
            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SourceError::Cancelled),
                result = node.balance(address) => result,
            };
            match attempt {
                Ok(observation) => return Ok((observation, Via::Node)),
                Err(e) => debug!("{} lookup for {} failed, falling back: {}", node.name(), address, e),
            }
        }

        let fallback = self.fallback.clone();
        let name = fallback.name();
        let attempt = || {
            let fallback = fallback.clone();
            async move { fallback.balance(address).await }
        };
        let backoff = ConstantBuilder::default()
            .with_delay(self.retry_delay)
            .with_max_times(self.retry_limit as usize - 1);

        let retried = attempt
            .retry(backoff)
            .sleep(tokio::time::sleep)
            .when(|e: &SourceError| !e.is_cancelled())
            .notify(|e: &SourceError, delay: Duration| {
                warn!("{} lookup for {} failed, retrying in {:?}: {}", name, address, delay, e)
            });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SourceError::Cancelled),
            result = retried => result.map(|observation| (observation, Via::Fallback)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnchainSettings {
    pub interval: Duration,
    pub request_delay: Duration,
    pub retry_limit: u32,
    pub retry_delay: Duration,
}

impl OnchainSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.onchain_poll_interval,
            request_delay: config.onchain_request_delay,
            retry_limit: config.onchain_retry_limit,
            retry_delay: config.onchain_retry_delay,
        }
    }
}

impl Default for OnchainSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1800),
            request_delay: Duration::from_secs(1),
            retry_limit: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Counts for one collection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub addresses: usize,
    pub succeeded: usize,
    pub via_node: usize,
    pub via_fallback: usize,
    pub failed: usize,
}

/// Records one balance row per active watched address per tick.
pub struct OnchainCollector {
    store: Store,
    fetcher: BalanceFetcher,
    cache: Option<Arc<BalanceCache>>,
    settings: OnchainSettings,
}

impl OnchainCollector {
    pub fn new(store: Store, fetcher: BalanceFetcher, settings: OnchainSettings) -> Self {
        Self {
            store,
            fetcher,
            cache: None,
            settings,
        }
    }

    /// Also publish every observation to `cache`.
    pub fn with_cache(mut self, cache: Arc<BalanceCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            "Starting on-chain collector (every {:?}, {:?} between requests)",
            self.settings.interval, self.settings.request_delay
        );
        let mut ticker = tokio::time::interval(self.settings.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(&shutdown).await {
                        error!("On-chain collection failed: {}", e);
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Shutting down on-chain collector");
                    break;
                }
            }
        }
    }

    /// One pass over every active address. Addresses whose sources all fail
    /// are skipped; cancellation stops the pass between addresses.
    pub async fn tick(&self, shutdown: &CancellationToken) -> Result<TickSummary, crate::db::StoreError> {
        let addresses = self.store.get_active_addresses().await?;
        let mut summary = TickSummary {
            addresses: addresses.len(),
            ..TickSummary::default()
        };

        for (position, watched) in addresses.iter().enumerate() {
            if shutdown.is_cancelled() {
                debug!("On-chain pass cancelled after {} addresses", position);
                break;
            }
            if position > 0 && !self.settings.request_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.request_delay) => {}
                    _ = shutdown.cancelled() => break,
                }
            }

            match self.fetcher.fetch(&watched.address, shutdown).await {
                Ok((observation, via)) => {
                    if let Err(e) = self.record(watched, &observation).await {
                        warn!("Could not store balance of {}: {}", watched.address, e);
                        summary.failed += 1;
                        continue;
                    }
                    summary.succeeded += 1;
                    match via {
                        Via::Node => summary.via_node += 1,
                        Via::Fallback => summary.via_fallback += 1,
                    }
                }
                Err(SourceError::Cancelled) => {
                    debug!("Lookup for {} cancelled", watched.address);
                    break;
                }
                Err(e) => {
                    warn!("No balance for {} this round: {}", watched.address, e);
                    summary.failed += 1;
                }
            }
        }

        info!(
            "On-chain pass: {}/{} addresses updated ({} via node, {} via fallback, {} failed)",
            summary.succeeded, summary.addresses, summary.via_node, summary.via_fallback, summary.failed
        );
        Ok(summary)
    }

    async fn record(&self, watched: &WatchedAddress, observation: &AddressObservation) -> Result<(), crate::db::StoreError> {
        let previous = self.store.get_latest_address_balance(watched.id).await?;
        let row = AddressBalance {
            address_id: watched.id,
            timestamp: observation.captured_at,
            balance: observation.balance,
            tx_count: observation.tx_count,
        };
        self.store.insert_address_balance(&row).await?;

        match previous {
            Some(prev) if prev.balance != row.balance => info!(
                "{}: balance {} -> {} sats ({:+})",
                watched.address,
                prev.balance,
                row.balance,
                row.balance - prev.balance
            ),
            Some(_) => debug!("{}: balance unchanged at {} sats", watched.address, row.balance),
            None => info!("{}: first observation, {} sats", watched.address, row.balance),
        }

        if let Some(cache) = &self.cache {
            cache.set(observation.clone()).await;
        }
        Ok(())
    }
}
