use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::amount::{json_btc_to_sats, Rounding};
use crate::models::{AddressObservation, AddressTransaction, Utxo};

use super::command::{CommandRunner, ProcessRunner};
use super::{AddressSource, SourceError};

/// Number of wallet transactions requested from `listtransactions`.
pub const LIST_TRANSACTIONS_LIMIT: usize = 10_000;

#[derive(Debug, Clone, Deserialize)]
pub struct BlockchainInfo {
    pub chain: String,
    pub blocks: u64,
    #[serde(default)]
    pub headers: u64,
    #[serde(default)]
    pub bestblockhash: String,
    #[serde(default)]
    pub verificationprogress: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DescriptorInfo {
    pub descriptor: String,
    pub checksum: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddressInfo {
    pub address: String,
    #[serde(default)]
    pub ismine: bool,
    #[serde(default)]
    pub iswatchonly: bool,
    #[serde(default)]
    pub solvable: bool,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RescanResult {
    pub start_height: u64,
    pub stop_height: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct UnspentEntry {
    txid: String,
    vout: u32,
    #[serde(default)]
    address: Option<String>,
    amount: serde_json::Number,
    #[serde(default)]
    confirmations: i64,
}

#[derive(Debug, Deserialize)]
struct WalletTransactionEntry {
    #[serde(default)]
    address: Option<String>,
    amount: serde_json::Number,
    txid: String,
    #[serde(default)]
    time: i64,
    #[serde(default)]
    blocktime: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ImportResult {
    success: bool,
    #[serde(default)]
    error: Option<ImportError>,
}

#[derive(Debug, Deserialize)]
struct ImportError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ValidateAddressResult {
    isvalid: bool,
}

fn is_already_imported(message: &str) -> bool {
    message.to_ascii_lowercase().contains("already")
}

/// Drives a local full node through its command line client, scoped to one
/// watch-only wallet.
pub struct BitcoinNodeAdapter {
    cli: String,
    wallet: String,
    runner: Arc<dyn CommandRunner>,
}

impl BitcoinNodeAdapter {
    pub fn new(cli: impl Into<String>, wallet: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        let cli = cli.into();
        let wallet = wallet.into();
        info!("Initializing bitcoin node adapter: {} (wallet {})", cli, wallet);
        Self { cli, wallet, runner }
    }

    pub fn with_process_runner(cli: impl Into<String>, wallet: impl Into<String>) -> Self {
        Self::new(cli, wallet, Arc::new(ProcessRunner))
    }

    pub fn wallet(&self) -> &str {
        &self.wallet
    }

    async fn call(&self, verb: &str, params: &[String]) -> Result<String, SourceError> {
        let mut args = Vec::with_capacity(params.len() + 2);
        args.push(format!("-rpcwallet={}", self.wallet));
        args.push(verb.to_string());
        args.extend(params.iter().cloned());

        self.runner.run(&self.cli, &args).await
    }

    async fn call_json<T: DeserializeOwned>(&self, verb: &str, params: &[String]) -> Result<T, SourceError> {
        let output = self.call(verb, params).await?;
        serde_json::from_str(output.trim())
            .map_err(|e| SourceError::Parse(format!("{} returned unexpected output: {}", verb, e)))
    }

    pub async fn blockchain_info(&self) -> Result<BlockchainInfo, SourceError> {
        self.call_json("getblockchaininfo", &[]).await
    }

    pub async fn descriptor_info(&self, address: &str) -> Result<DescriptorInfo, SourceError> {
        self.call_json("getdescriptorinfo", &[format!("addr({})", address)])
            .await
    }

    /// Add `address` to the watch-only wallet. Addresses the wallet already
    /// knows are accepted silently.
    pub async fn import_address(&self, address: &str, label: &str) -> Result<(), SourceError> {
        let info = self.descriptor_info(address).await?;
        let request = json!([{
            "desc": info.descriptor,
            "timestamp": 0,
            "label": label,
        }]);

        let results: Vec<ImportResult> = match self
            .call_json("importdescriptors", &[request.to_string()])
            .await
        {
            Ok(results) => results,
            Err(SourceError::Command { stderr, .. }) if is_already_imported(&stderr) => {
                debug!("{} already imported into wallet {}", address, self.wallet);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        for result in results {
            if result.success {
                continue;
            }
            let message = result.error.map(|e| e.message).unwrap_or_default();
            if is_already_imported(&message) {
                debug!("{} already imported into wallet {}", address, self.wallet);
                continue;
            }
            return Err(SourceError::Unavailable(format!(
                "importdescriptors failed for {}: {}",
                address, message
            )));
        }

        info!("Imported {} into watch-only wallet {}", address, self.wallet);
        Ok(())
    }

    pub async fn list_unspent(&self, address: &str) -> Result<Vec<Utxo>, SourceError> {
        let filter = json!([address]).to_string();
        let entries: Vec<UnspentEntry> = self
            .call_json(
                "listunspent",
                &["0".to_string(), "9999999".to_string(), filter],
            )
            .await?;

        entries
            .into_iter()
            .filter(|entry| entry.address.as_deref().map_or(true, |a| a == address))
            .map(|entry| {
                Ok(Utxo {
                    value: json_btc_to_sats(&entry.amount, Rounding::Nearest)?,
                    txid: entry.txid,
                    vout: entry.vout,
                    confirmed: entry.confirmations > 0,
                })
            })
            .collect()
    }

    /// Wallet transactions involving `address`, netted per txid and sorted
    /// by time.
    pub async fn list_transactions(&self, address: &str) -> Result<Vec<AddressTransaction>, SourceError> {
        let entries: Vec<WalletTransactionEntry> = self
            .call_json(
                "listtransactions",
                &[
                    "*".to_string(),
                    LIST_TRANSACTIONS_LIMIT.to_string(),
                    "0".to_string(),
                    "true".to_string(),
                ],
            )
            .await?;

        if entries.len() >= LIST_TRANSACTIONS_LIMIT {
            warn!(
                "listtransactions returned {} entries; older history in wallet {} is not visible",
                entries.len(),
                self.wallet
            );
        }

        let mut by_txid: BTreeMap<String, AddressTransaction> = BTreeMap::new();
        for entry in entries {
            if entry.address.as_deref() != Some(address) {
                continue;
            }
            let amount = json_btc_to_sats(&entry.amount, Rounding::Truncate)?;
            let block_time = entry.blocktime.unwrap_or(entry.time);
            by_txid
                .entry(entry.txid.clone())
                .and_modify(|tx| tx.amount += amount)
                .or_insert(AddressTransaction {
                    txid: entry.txid,
                    block_time,
                    amount,
                });
        }

        let mut transactions: Vec<AddressTransaction> = by_txid.into_values().collect();
        transactions.sort_by(|a, b| a.block_time.cmp(&b.block_time).then_with(|| a.txid.cmp(&b.txid)));
        Ok(transactions)
    }

    pub async fn validate_address(&self, address: &str) -> Result<bool, SourceError> {
        let result: ValidateAddressResult = self
            .call_json("validateaddress", &[address.to_string()])
            .await?;
        Ok(result.isvalid)
    }

    pub async fn address_info(&self, address: &str) -> Result<AddressInfo, SourceError> {
        self.call_json("getaddressinfo", &[address.to_string()]).await
    }

    pub async fn rescan(&self, start_height: u64) -> Result<RescanResult, SourceError> {
        info!("Rescanning wallet {} from height {}", self.wallet, start_height);
        self.call_json("rescanblockchain", &[start_height.to_string()])
            .await
    }
}

#[async_trait]
impl AddressSource for BitcoinNodeAdapter {
    fn name(&self) -> &'static str {
        "node"
    }

    async fn balance(&self, address: &str) -> Result<AddressObservation, SourceError> {
        let utxos = self.list_unspent(address).await?;
        let balance = utxos.iter().map(|u| u.value).sum();
        let tx_count = utxos.iter().map(|u| u.txid.as_str()).collect::<HashSet<_>>().len() as i64;

        Ok(AddressObservation {
            address: address.to_string(),
            balance,
            tx_count,
            captured_at: chrono::Utc::now().timestamp(),
        })
    }

    async fn utxos(&self, address: &str) -> Result<Vec<Utxo>, SourceError> {
        self.list_unspent(address).await
    }

    async fn transactions(&self, address: &str) -> Result<Vec<AddressTransaction>, SourceError> {
        self.list_transactions(address).await
    }

    async fn validate(&self, address: &str) -> Result<bool, SourceError> {
        self.validate_address(address).await
    }
}
