use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::models::{AddressObservation, AddressTransaction, Utxo};
use crate::rate_limit::RateLimiter;
use crate::validation::validate_bitcoin_address;

use super::{error_for_response, AddressSource, SourceError};

pub const DEFAULT_BASE_URL: &str = "https://mempool.space/api";

/// Confirmed transactions returned per `/txs` page.
const CONFIRMED_PAGE_SIZE: usize = 25;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TxoStats {
    #[serde(default)]
    pub funded_txo_count: i64,
    #[serde(default)]
    pub funded_txo_sum: i64,
    #[serde(default)]
    pub spent_txo_count: i64,
    #[serde(default)]
    pub spent_txo_sum: i64,
    #[serde(default)]
    pub tx_count: i64,
}

impl TxoStats {
    pub fn balance(&self) -> i64 {
        self.funded_txo_sum - self.spent_txo_sum
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AddressStats {
    pub address: String,
    #[serde(default)]
    pub chain_stats: TxoStats,
    #[serde(default)]
    pub mempool_stats: TxoStats,
}

#[derive(Debug, Deserialize)]
struct UtxoStatus {
    #[serde(default)]
    confirmed: bool,
    #[serde(default)]
    block_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct UtxoEntry {
    txid: String,
    vout: u32,
    value: i64,
    status: UtxoStatus,
}

#[derive(Debug, Deserialize)]
struct TxOutput {
    #[serde(default)]
    scriptpubkey_address: Option<String>,
    value: i64,
}

#[derive(Debug, Deserialize)]
struct TxInput {
    #[serde(default)]
    prevout: Option<TxOutput>,
}

#[derive(Debug, Deserialize)]
pub struct ApiTransaction {
    txid: String,
    #[serde(default)]
    vin: Vec<TxInput>,
    #[serde(default)]
    vout: Vec<TxOutput>,
    status: UtxoStatus,
}

impl ApiTransaction {
    pub fn txid(&self) -> &str {
        &self.txid
    }

    pub fn is_confirmed(&self) -> bool {
        self.status.confirmed
    }

    /// Received minus spent for `address` in this transaction.
    fn net_amount(&self, address: &str) -> i64 {
        let received: i64 = self
            .vout
            .iter()
            .filter(|out| out.scriptpubkey_address.as_deref() == Some(address))
            .map(|out| out.value)
            .sum();
        let spent: i64 = self
            .vin
            .iter()
            .filter_map(|input| input.prevout.as_ref())
            .filter(|prev| prev.scriptpubkey_address.as_deref() == Some(address))
            .map(|prev| prev.value)
            .sum();
        received - spent
    }

    fn for_address(&self, address: &str, now: i64) -> AddressTransaction {
        AddressTransaction {
            txid: self.txid.clone(),
            block_time: self.status.block_time.filter(|_| self.status.confirmed).unwrap_or(now),
            amount: self.net_amount(address),
        }
    }
}

/// Client for an Esplora/mempool.space style REST API. Every request takes a
/// token from the shared [`RateLimiter`].
pub struct MempoolAdapter {
    client: Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
    cancel: CancellationToken,
}

impl MempoolAdapter {
    pub fn new(base_url: impl Into<String>, timeout: Duration, limiter: Arc<RateLimiter>) -> Result<Self, SourceError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        info!("Initializing mempool adapter with base URL: {}", base_url);
        Ok(Self {
            client,
            base_url,
            limiter,
            cancel: CancellationToken::new(),
        })
    }

    /// Tie pending rate-limit waits to `cancel`.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, path: &str, what: &str) -> Result<reqwest::Response, SourceError> {
        self.limiter.wait(&self.cancel).await?;

        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);
        let response = tokio::select! {
            _ = self.cancel.cancelled() => return Err(SourceError::Cancelled),
            response = self.client.get(&url).send() => response?,
        };

        if !response.status().is_success() {
            return Err(error_for_response(response, what).await);
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T, SourceError> {
        let response = self.get(path, what).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| SourceError::Parse(format!("{}: {}", path, e)))
    }

    pub async fn address_stats(&self, address: &str) -> Result<AddressStats, SourceError> {
        self.get_json(&format!("/address/{}", address), address).await
    }

    pub async fn address_utxos(&self, address: &str) -> Result<Vec<Utxo>, SourceError> {
        let entries: Vec<UtxoEntry> = self
            .get_json(&format!("/address/{}/utxo", address), address)
            .await?;

        Ok(entries
            .into_iter()
            .map(|entry| Utxo {
                txid: entry.txid,
                vout: entry.vout,
                value: entry.value,
                confirmed: entry.status.confirmed,
            })
            .collect())
    }

    /// One page of transactions; `after_txid` continues from the last
    /// confirmed transaction of the previous page.
    pub async fn transactions_page(
        &self,
        address: &str,
        after_txid: Option<&str>,
    ) -> Result<Vec<ApiTransaction>, SourceError> {
        let path = match after_txid {
            Some(txid) => format!("/address/{}/txs?after_txid={}", address, txid),
            None => format!("/address/{}/txs", address),
        };
        self.get_json(&path, address).await
    }

    pub async fn address_transactions(&self, address: &str) -> Result<Vec<AddressTransaction>, SourceError> {
        let now = chrono::Utc::now().timestamp();
        let mut seen = HashSet::new();
        let mut transactions = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = self.transactions_page(address, cursor.as_deref()).await?;
            let confirmed: Vec<&ApiTransaction> = page.iter().filter(|tx| tx.is_confirmed()).collect();

            for tx in &page {
                if seen.insert(tx.txid.clone()) {
                    transactions.push(tx.for_address(address, now));
                }
            }

            if confirmed.len() < CONFIRMED_PAGE_SIZE {
                break;
            }
            match confirmed.last() {
                Some(last) if cursor.as_deref() != Some(last.txid()) => cursor = Some(last.txid.clone()),
                _ => break,
            }
        }

        transactions.sort_by(|a, b| a.block_time.cmp(&b.block_time).then_with(|| a.txid.cmp(&b.txid)));
        debug!("Fetched {} transactions for {}", transactions.len(), address);
        Ok(transactions)
    }

    pub async fn tip_height(&self) -> Result<u64, SourceError> {
        let response = self.get("/blocks/tip/height", "tip height").await?;
        let body = response.text().await?;
        body.trim()
            .parse()
            .map_err(|_| SourceError::Parse(format!("unexpected tip height: {}", body.trim())))
    }
}

#[async_trait]
impl AddressSource for MempoolAdapter {
    fn name(&self) -> &'static str {
        "mempool"
    }

    async fn balance(&self, address: &str) -> Result<AddressObservation, SourceError> {
        let stats = self.address_stats(address).await?;
        Ok(AddressObservation {
            address: address.to_string(),
            balance: stats.chain_stats.balance() + stats.mempool_stats.balance(),
            tx_count: stats.chain_stats.tx_count + stats.mempool_stats.tx_count,
            captured_at: chrono::Utc::now().timestamp(),
        })
    }

    async fn utxos(&self, address: &str) -> Result<Vec<Utxo>, SourceError> {
        self.address_utxos(address).await
    }

    async fn transactions(&self, address: &str) -> Result<Vec<AddressTransaction>, SourceError> {
        self.address_transactions(address).await
    }

    /// Checked locally; the API has no validation endpoint.
    async fn validate(&self, address: &str) -> Result<bool, SourceError> {
        Ok(validate_bitcoin_address(address).is_ok())
    }
}
