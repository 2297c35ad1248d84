use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::validation::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressType {
    #[serde(rename = "P2SH")]
    P2sh,
    #[serde(rename = "P2WSH")]
    P2wsh,
    #[serde(rename = "P2SH-P2WSH")]
    P2shP2wsh,
}

impl AddressType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressType::P2sh => "P2SH",
            AddressType::P2wsh => "P2WSH",
            AddressType::P2shP2wsh => "P2SH-P2WSH",
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AddressType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('_', "-").as_str() {
            "P2SH" => Ok(AddressType::P2sh),
            "P2WSH" => Ok(AddressType::P2wsh),
            "P2SH-P2WSH" => Ok(AddressType::P2shP2wsh),
            other => Err(ValidationError::InvalidParameter(format!(
                "unsupported address type '{}', expected P2SH, P2WSH or P2SH-P2WSH",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletNetwork {
    Mainnet,
    Testnet,
}

impl WalletNetwork {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletNetwork::Mainnet => "mainnet",
            WalletNetwork::Testnet => "testnet",
        }
    }

    pub fn bitcoin_network(&self) -> bitcoin::Network {
        match self {
            WalletNetwork::Mainnet => bitcoin::Network::Bitcoin,
            WalletNetwork::Testnet => bitcoin::Network::Testnet,
        }
    }
}

impl fmt::Display for WalletNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WalletNetwork {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "main" | "bitcoin" => Ok(WalletNetwork::Mainnet),
            "testnet" | "test" => Ok(WalletNetwork::Testnet),
            other => Err(ValidationError::InvalidParameter(format!(
                "unsupported network '{}', expected mainnet or testnet",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisigWallet {
    pub id: i64,
    pub uuid: String,
    pub name: String,
    pub address_type: AddressType,
    pub network: WalletNetwork,
    pub required_signers: u32,
    pub total_signers: u32,
    pub starting_index: u32,
    pub next_index: u32,
    pub active: bool,
    pub created_at: i64,
    pub last_scanned: Option<i64>,
}

impl MultisigWallet {
    /// Label prefix shared by every watched address derived from this wallet.
    pub fn label_prefix(&self) -> String {
        format!(
            "{} [{}/{}] -",
            self.name, self.required_signers, self.total_signers
        )
    }

    pub fn address_label(&self, index: u32) -> String {
        format!("{} #{}", self.label_prefix(), index)
    }
}

/// Wallet row to be inserted; ids and timestamps are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMultisigWallet {
    pub uuid: String,
    pub name: String,
    pub address_type: AddressType,
    pub network: WalletNetwork,
    pub required_signers: u32,
    pub total_signers: u32,
    pub starting_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedPubKey {
    pub wallet_id: i64,
    pub key_index: u32,
    pub name: String,
    pub xpub: String,
    pub bip32_path: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewExtendedPubKey {
    pub name: String,
    pub xpub: String,
    pub bip32_path: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisigAddress {
    pub wallet_id: i64,
    pub address: String,
    pub address_index: u32,
    pub script_type: AddressType,
    pub redeem_script: String,
}
