//! Balance history rebuilt from the present.
//!
//! Current balances are taken as ground truth and transactions are undone
//! one day at a time, newest first. Every balance is in satoshi.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collector::{BalanceFetcher, Via};
use crate::db::Store;
use crate::error::{Error, Result};
use crate::models::{
    day_start, AddressTransaction, BalancePoint, LightningHistoryPoint, PortfolioSnapshot, SECONDS_PER_DAY,
};
use crate::sources::{LightningNodeAdapter, SourceError};
use crate::validation::ValidationError;

/// The current balance of one address and every transaction touching it.
#[derive(Debug, Clone, Default)]
pub struct AddressLedger {
    pub balance: i64,
    pub transactions: Vec<AddressTransaction>,
}

impl AddressLedger {
    /// Balance at the end of the day starting at `day`.
    fn balance_at_end_of(&self, day: i64) -> i64 {
        let day_end = day + SECONDS_PER_DAY - 1;
        let later: i64 = self
            .transactions
            .iter()
            .filter(|tx| tx.block_time > day_end)
            .map(|tx| tx.amount)
            .sum();
        self.balance - later
    }
}

fn check_window(from: i64, to: i64) -> Result<()> {
    if from > to {
        return Err(ValidationError::InvalidParameter(format!(
            "history window starts after it ends ({} > {})",
            from, to
        ))
        .into());
    }
    Ok(())
}

/// Daily balances of one address over `[from, to]`, oldest first.
///
/// Days are walked from the day containing `to` back to the day containing
/// `from`. Each day is reported with its closing balance, after which that
/// day's net flow is undone. Transactions later than `to` are undone before
/// the walk starts.
pub fn reconstruct_address_history(
    current: i64,
    transactions: &[AddressTransaction],
    from: i64,
    to: i64,
) -> Vec<BalancePoint> {
    if from > to {
        return Vec::new();
    }

    let mut running = current;
    let mut flows: BTreeMap<i64, i64> = BTreeMap::new();
    for tx in transactions {
        if tx.block_time > to {
            running -= tx.amount;
        } else if tx.block_time >= from {
            *flows.entry(day_start(tx.block_time)).or_default() += tx.amount;
        }
    }

    let first_day = day_start(from);
    let mut day = day_start(to);
    let mut points = Vec::with_capacity(((day - first_day) / SECONDS_PER_DAY + 1) as usize);
    while day >= first_day {
        points.push(BalancePoint {
            timestamp: day,
            balance: running,
        });
        running -= flows.get(&day).copied().unwrap_or(0);
        day -= SECONDS_PER_DAY;
    }

    points.reverse();
    points
}

/// Portfolio snapshots over `[from, to]`, one per day on which anything
/// changed plus the two window endpoints.
///
/// Tracked addresses are evaluated at the close of each day. Lightning fields
/// come from the latest point at or before that close, or zero. Cold storage
/// is the current total at every point.
pub fn reconstruct_portfolio_history(
    addresses: &[AddressLedger],
    lightning: &[LightningHistoryPoint],
    cold_storage: i64,
    from: i64,
    to: i64,
) -> Vec<PortfolioSnapshot> {
    if from > to {
        return Vec::new();
    }

    let in_window = |t: i64| t >= from && t <= to;
    let mut days: BTreeSet<i64> = BTreeSet::new();
    days.insert(day_start(from));
    days.insert(day_start(to));
    for ledger in addresses {
        days.extend(
            ledger
                .transactions
                .iter()
                .filter(|tx| in_window(tx.block_time))
                .map(|tx| day_start(tx.block_time)),
        );
    }
    days.extend(
        lightning
            .iter()
            .filter(|p| in_window(p.timestamp))
            .map(|p| day_start(p.timestamp)),
    );

    let mut lightning = lightning.to_vec();
    lightning.sort_by_key(|p| p.timestamp);

    days.into_iter()
        .map(|day| {
            let day_end = day + SECONDS_PER_DAY - 1;
            let tracked: i64 = addresses.iter().map(|l| l.balance_at_end_of(day)).sum();
            let node = lightning.iter().rev().find(|p| p.timestamp <= day_end);

            PortfolioSnapshot {
                timestamp: day,
                lightning_local: node.map_or(0, |p| p.local),
                lightning_remote: node.map_or(0, |p| p.remote),
                onchain_confirmed: node.map_or(0, |p| p.onchain),
                onchain_unconfirmed: 0,
                tracked_addresses: tracked,
                cold_storage,
                ..PortfolioSnapshot::default()
            }
            .with_totals()
        })
        .collect()
}

/// Gathers current balances and transaction lists from the sources and
/// feeds them through the reconstruction functions.
pub struct HistoryReconstructor {
    store: Store,
    fetcher: BalanceFetcher,
    lightning: Option<Arc<LightningNodeAdapter>>,
    shutdown: CancellationToken,
}

impl HistoryReconstructor {
    pub fn new(
        store: Store,
        fetcher: BalanceFetcher,
        lightning: Option<Arc<LightningNodeAdapter>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            fetcher,
            lightning,
            shutdown,
        }
    }

    /// Current balance and transactions of `address`, read from the adapter
    /// that answered the balance request. A node that answers the balance but
    /// not the transaction list is backed by the fallback.
    pub async fn ledger(&self, address: &str) -> std::result::Result<AddressLedger, SourceError> {
        let (observation, via) = self.fetcher.fetch(address, &self.shutdown).await?;

        let transactions = match (via, self.fetcher.node()) {
            (Via::Node, Some(node)) => match node.transactions(address).await {
                Ok(txs) => txs,
                Err(e) => {
                    debug!("{} transactions for {} unavailable: {}", node.name(), address, e);
                    self.fetcher.fallback().transactions(address).await?
                }
            },
            _ => self.fetcher.fallback().transactions(address).await?,
        };

        Ok(AddressLedger {
            balance: observation.balance,
            transactions,
        })
    }

    pub async fn address_history(&self, address: &str, from: i64, to: i64) -> Result<Vec<BalancePoint>> {
        check_window(from, to)?;
        let ledger = self.ledger(address).await?;
        debug!(
            "Rebuilding {} from {} sats and {} transactions",
            address,
            ledger.balance,
            ledger.transactions.len()
        );
        Ok(reconstruct_address_history(ledger.balance, &ledger.transactions, from, to))
    }

    /// Addresses or a Lightning node that cannot be read are left out of the
    /// series with a warning.
    pub async fn portfolio_history(&self, from: i64, to: i64) -> Result<Vec<PortfolioSnapshot>> {
        check_window(from, to)?;

        let addresses = self.store.get_active_addresses().await?;
        let lookups = addresses.iter().map(|watched| self.ledger(&watched.address));
        let results = futures::future::join_all(lookups).await;

        let mut ledgers = Vec::with_capacity(addresses.len());
        for (watched, result) in addresses.iter().zip(results) {
            match result {
                Ok(ledger) => ledgers.push(ledger),
                Err(SourceError::Cancelled) => return Err(Error::Source(SourceError::Cancelled)),
                Err(e) => warn!("Leaving {} out of portfolio history: {}", watched.address, e),
            }
        }

        let lightning = match &self.lightning {
            Some(node) => match node.history(from, to).await {
                Ok(points) => points,
                Err(e) => {
                    warn!("Lightning history unavailable: {}", e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let cold_storage = self.store.get_cold_storage_total().await?;
        let series = reconstruct_portfolio_history(&ledgers, &lightning, cold_storage, from, to);
        info!(
            "Rebuilt {} portfolio points from {} of {} addresses and {} lightning points",
            series.len(),
            ledgers.len(),
            addresses.len(),
            lightning.len()
        );
        Ok(series)
    }
}
