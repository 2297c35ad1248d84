// Domain records persisted by the store, plus the transient observations
// produced by source adapters.

pub mod cold_storage;
pub mod multisig;

use serde::{Deserialize, Serialize};

pub use cold_storage::{ColdStorageAccount, ColdStorageEntry, ColdStorageHistoryEntry, COLD_STORAGE_WARNING_DAYS};
pub use multisig::{
    AddressType, ExtendedPubKey, MultisigAddress, MultisigWallet, NewExtendedPubKey,
    NewMultisigWallet, WalletNetwork,
};

pub const SECONDS_PER_DAY: i64 = 86_400;

/// Midnight (UTC) of the day containing `timestamp`.
pub fn day_start(timestamp: i64) -> i64 {
    timestamp.div_euclid(SECONDS_PER_DAY) * SECONDS_PER_DAY
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedAddress {
    pub id: i64,
    pub address: String,
    pub label: Option<String>,
    pub active: bool,
    pub created_at: i64,
}

/// A watched address together with its most recent observation, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchedAddressSummary {
    #[serde(flatten)]
    pub address: WatchedAddress,
    pub balance: Option<i64>,
    pub tx_count: Option<i64>,
    pub last_updated: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AddressBalance {
    pub address_id: i64,
    pub timestamp: i64,
    pub balance: i64,
    pub tx_count: i64,
}

/// Row of an address history query, joined with the address string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AddressBalanceRecord {
    pub address: String,
    pub timestamp: i64,
    pub balance: i64,
    pub tx_count: i64,
}

/// Point-in-time aggregate over every custody surface, in satoshi.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PortfolioSnapshot {
    pub timestamp: i64,
    pub lightning_local: i64,
    pub lightning_remote: i64,
    pub onchain_confirmed: i64,
    pub onchain_unconfirmed: i64,
    pub tracked_addresses: i64,
    pub cold_storage: i64,
    pub total_liquid: i64,
    pub total_portfolio: i64,
}

impl PortfolioSnapshot {
    pub fn empty(timestamp: i64) -> Self {
        Self {
            timestamp,
            ..Self::default()
        }
    }

    /// Recompute the derived totals from the component fields.
    pub fn recompute_totals(&mut self) {
        self.total_liquid = self.lightning_local
            + self.onchain_confirmed
            + self.onchain_unconfirmed
            + self.tracked_addresses;
        self.total_portfolio = self.total_liquid + self.cold_storage;
    }

    pub fn with_totals(mut self) -> Self {
        self.recompute_totals();
        self
    }

    pub fn totals_consistent(&self) -> bool {
        let liquid = self.lightning_local
            + self.onchain_confirmed
            + self.onchain_unconfirmed
            + self.tracked_addresses;
        self.total_liquid == liquid && self.total_portfolio == liquid + self.cold_storage
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ForwardingEvent {
    pub timestamp: i64,
    pub chan_id_in: String,
    pub chan_id_out: String,
    pub amount_in: i64,
    pub amount_out: i64,
    pub fee: i64,
}

/// Per-day routing fee aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ForwardingFeeDay {
    pub date: String,
    pub total_fee: i64,
    pub forward_count: i64,
    pub total_amount_out: i64,
}

/// One currency balance held at the Strike custodian, in that currency's
/// smallest unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StrikeBalance {
    pub currency: String,
    pub available: i64,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StrikeBalanceRecord {
    pub timestamp: i64,
    pub currency: String,
    pub available: i64,
    pub total: i64,
}

/// A balance observation returned by an address source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressObservation {
    pub address: String,
    pub balance: i64,
    pub tx_count: i64,
    pub captured_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    pub value: i64,
    pub confirmed: bool,
}

/// A transaction's net effect on one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressTransaction {
    pub txid: String,
    /// Unix seconds; unconfirmed transactions carry the time they were seen.
    pub block_time: i64,
    /// Signed satoshi: positive for receipts, negative for spends.
    pub amount: i64,
}

/// A point on the reconstructed balance curve of a single address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalancePoint {
    pub timestamp: i64,
    pub balance: i64,
}

/// Lightning node balances at the time of a Lightning-visible event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightningHistoryPoint {
    pub timestamp: i64,
    pub local: i64,
    pub remote: i64,
    pub onchain: i64,
}
