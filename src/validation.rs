use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address, Network};
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

/// 2009-01-03 00:00:00 UTC, the genesis block date.
pub const GENESIS_DATE_UNIX: i64 = 1_230_940_800;

pub const MAX_HISTORY_DAYS: u32 = 365;

/// Upper bound on keys in a standard bare multisig redeem script.
pub const MAX_MULTISIG_KEYS: u32 = 15;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid bitcoin address: {0}")]
    InvalidAddress(String),

    #[error("Invalid days parameter: {0}. Must be an integer between 1 and 365 or 'all'")]
    InvalidDays(String),

    #[error("Invalid quorum: {0}")]
    InvalidQuorum(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Validate a Bitcoin address string and report which network it belongs to.
///
/// Accepts base58 (P2PKH / P2SH) and bech32/bech32m encodings for mainnet,
/// testnet, signet and regtest.
pub fn validate_bitcoin_address(address: &str) -> Result<Network, ValidationError> {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingParameter("address".to_string()));
    }

    let unchecked: Address<NetworkUnchecked> = trimmed
        .parse()
        .map_err(|_| ValidationError::InvalidAddress(trimmed.to_string()))?;

    [Network::Bitcoin, Network::Testnet, Network::Signet, Network::Regtest]
        .into_iter()
        .find(|network| unchecked.is_valid_for_network(*network))
        .ok_or_else(|| ValidationError::InvalidAddress(trimmed.to_string()))
}

/// A parsed `days` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaysRange {
    Days(u32),
    All,
}

impl DaysRange {
    /// Start of the requested window, ending at `now`.
    pub fn start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            DaysRange::Days(days) => now - Duration::days(*days as i64),
            DaysRange::All => genesis_date(),
        }
    }
}

pub fn genesis_date() -> DateTime<Utc> {
    DateTime::from_timestamp(GENESIS_DATE_UNIX, 0).unwrap_or_default()
}

pub fn parse_days(raw: &str) -> Result<DaysRange, ValidationError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(ValidationError::MissingParameter("days".to_string()));
    }
    if value.eq_ignore_ascii_case("all") {
        return Ok(DaysRange::All);
    }

    match value.parse::<u32>() {
        Ok(days) if (1..=MAX_HISTORY_DAYS).contains(&days) => Ok(DaysRange::Days(days)),
        _ => Err(ValidationError::InvalidDays(value.to_string())),
    }
}

pub fn validate_quorum(required: u32, total: u32, key_count: usize) -> Result<(), ValidationError> {
    if required < 1 {
        return Err(ValidationError::InvalidQuorum(
            "at least one signature is required".to_string(),
        ));
    }
    if required > total {
        return Err(ValidationError::InvalidQuorum(format!(
            "required signers {} exceeds total signers {}",
            required, total
        )));
    }
    if total > MAX_MULTISIG_KEYS {
        return Err(ValidationError::InvalidQuorum(format!(
            "at most {} signers are supported, got {}",
            MAX_MULTISIG_KEYS, total
        )));
    }
    if key_count != total as usize {
        return Err(ValidationError::InvalidQuorum(format!(
            "expected {} extended public keys, got {}",
            total, key_count
        )));
    }
    Ok(())
}
