//! Multisig wallet import and receive-address generation.

pub mod derive;
pub mod descriptor;

use std::sync::Arc;

use bitcoin::bip32::Xpub;
use bitcoin::secp256k1::{Secp256k1, VerifyOnly};
use bitcoin::Network;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::{Store, StoreError};
use crate::models::{ExtendedPubKey, MultisigAddress, MultisigWallet};
use crate::sources::BitcoinNodeAdapter;
use crate::validation::ValidationError;

pub use derive::{derive_address, normalize_xpub, parse_xpub, DerivedAddress};
pub use descriptor::{KeyDescriptor, Quorum, WalletDescriptor};

/// Largest batch accepted by [`MultisigDeriver::generate_addresses`].
pub const MAX_GENERATE_COUNT: u32 = 1_000;

#[derive(Error, Debug)]
pub enum MultisigError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Invalid wallet descriptor: {0}")]
    Descriptor(String),

    #[error("Invalid extended public key {0}")]
    InvalidXpub(String),

    #[error("Extended public key {key} does not belong to {expected}")]
    NetworkMismatch { key: String, expected: Network },

    #[error("Key derivation failed: {0}")]
    Derivation(#[from] bitcoin::bip32::Error),

    #[error("Script error: {0}")]
    Script(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Imports wallets and derives their addresses, registering each derived
/// address for balance collection.
pub struct MultisigDeriver {
    store: Store,
    node: Option<Arc<BitcoinNodeAdapter>>,
    secp: Secp256k1<VerifyOnly>,
}

impl MultisigDeriver {
    pub fn new(store: Store, node: Option<Arc<BitcoinNodeAdapter>>) -> Self {
        Self {
            store,
            node,
            secp: Secp256k1::verification_only(),
        }
    }

    /// Validate and store a wallet descriptor.
    pub async fn import_wallet(&self, descriptor: &WalletDescriptor) -> Result<MultisigWallet, MultisigError> {
        let validated = descriptor.validate()?;

        if self
            .store
            .get_multisig_wallet_by_uuid(&validated.wallet.uuid)
            .await?
            .is_some()
        {
            return Err(StoreError::Conflict(format!(
                "multisig wallet {} already exists",
                validated.wallet.uuid
            ))
            .into());
        }

        let wallet = self
            .store
            .insert_multisig_wallet(&validated.wallet, &validated.keys)
            .await?;
        info!(
            "Imported {}-of-{} {} wallet '{}' ({})",
            wallet.required_signers, wallet.total_signers, wallet.address_type, wallet.name, wallet.uuid
        );
        Ok(wallet)
    }

    pub async fn import_wallet_json(&self, json: &str) -> Result<MultisigWallet, MultisigError> {
        let descriptor = WalletDescriptor::from_json(json)?;
        self.import_wallet(&descriptor).await
    }

    fn parse_keys(&self, wallet: &MultisigWallet, keys: &[ExtendedPubKey]) -> Result<Vec<Xpub>, MultisigError> {
        if keys.len() != wallet.total_signers as usize {
            return Err(MultisigError::Descriptor(format!(
                "wallet {} has {} keys stored, expected {}",
                wallet.id,
                keys.len(),
                wallet.total_signers
            )));
        }
        let network = wallet.network.bitcoin_network();
        keys.iter().map(|key| parse_xpub(&key.xpub, network)).collect()
    }

    fn derive_with(
        &self,
        wallet: &MultisigWallet,
        xpubs: &[Xpub],
        index: u32,
    ) -> Result<MultisigAddress, MultisigError> {
        let derived = derive_address(
            &self.secp,
            xpubs,
            wallet.required_signers,
            wallet.address_type,
            wallet.network.bitcoin_network(),
            index,
        )?;

        Ok(MultisigAddress {
            wallet_id: wallet.id,
            address: derived.address,
            address_index: derived.index,
            script_type: derived.script_type,
            redeem_script: derived.redeem_script,
        })
    }

    /// Derive the address at `index` without storing it.
    pub async fn derive(&self, wallet_id: i64, index: u32) -> Result<MultisigAddress, MultisigError> {
        let wallet = self.store.get_multisig_wallet(wallet_id).await?;
        let keys = self.store.get_multisig_keys(wallet_id).await?;
        let xpubs = self.parse_keys(&wallet, &keys)?;
        self.derive_with(&wallet, &xpubs, index)
    }

    /// Produce the next `count` receive addresses starting at the wallet's
    /// `next_index`. Addresses already stored at those indices are reused,
    /// new ones are derived, and everything is registered for tracking in a
    /// single store transaction that also advances `next_index`.
    pub async fn generate_addresses(&self, wallet_id: i64, count: u32) -> Result<Vec<MultisigAddress>, MultisigError> {
        if count == 0 || count > MAX_GENERATE_COUNT {
            return Err(ValidationError::InvalidParameter(format!(
                "count must be between 1 and {}, got {}",
                MAX_GENERATE_COUNT, count
            ))
            .into());
        }

        let wallet = self.store.get_multisig_wallet(wallet_id).await?;
        if !wallet.active {
            return Err(StoreError::NotFound(format!("multisig wallet {}", wallet_id)).into());
        }
        let keys = self.store.get_multisig_keys(wallet_id).await?;
        let xpubs = self.parse_keys(&wallet, &keys)?;

        let start = wallet.next_index;
        let end = start.checked_add(count).ok_or_else(|| {
            ValidationError::InvalidParameter(format!("index range {}+{} overflows", start, count))
        })?;
        let mut existing = self
            .store
            .get_multisig_addresses_in_range(wallet_id, start, end)
            .await?;

        let mut batch = Vec::with_capacity(count as usize);
        let mut fresh = Vec::new();
        for index in start..end {
            match existing.remove(&index) {
                Some(stored) => batch.push(stored),
                None => {
                    let derived = self.derive_with(&wallet, &xpubs, index)?;
                    fresh.push(derived.clone());
                    batch.push(derived);
                }
            }
        }
        debug!(
            "Wallet {}: {} addresses reused, {} derived for indices {}..{}",
            wallet_id,
            batch.len() - fresh.len(),
            fresh.len(),
            start,
            end
        );

        self.store
            .record_generated_addresses(&wallet, &batch, &fresh, start, end)
            .await?;

        if let Some(node) = &self.node {
            for address in &batch {
                let label = wallet.address_label(address.address_index);
                if let Err(e) = node.import_address(&address.address, &label).await {
                    warn!("Failed to import {} into the node wallet: {}", address.address, e);
                }
            }
        }

        info!(
            "Generated {} addresses for wallet '{}' (next index {})",
            batch.len(),
            wallet.name,
            end
        );
        Ok(batch)
    }

    pub async fn list_wallets(&self) -> Result<Vec<MultisigWallet>, MultisigError> {
        Ok(self.store.list_multisig_wallets(false).await?)
    }

    pub async fn wallet_addresses(&self, wallet_id: i64) -> Result<Vec<MultisigAddress>, MultisigError> {
        self.store.get_multisig_wallet(wallet_id).await?;
        Ok(self.store.get_multisig_addresses(wallet_id).await?)
    }

    pub async fn delete_wallet(&self, wallet_id: i64) -> Result<(), MultisigError> {
        Ok(self.store.delete_multisig_wallet(wallet_id).await?)
    }
}
