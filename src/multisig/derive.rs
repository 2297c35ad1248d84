//! Deterministic m-of-n address derivation from extended public keys.

use std::str::FromStr;

use bitcoin::base58;
use bitcoin::bip32::{ChildNumber, Xpub};
use bitcoin::opcodes::all::OP_CHECKMULTISIG;
use bitcoin::script::Builder;
use bitcoin::secp256k1::{Secp256k1, Verification};
use bitcoin::{Address, Network, NetworkKind, PublicKey, ScriptBuf};

use crate::models::AddressType;

use super::MultisigError;

const XPUB_VERSION: [u8; 4] = [0x04, 0x88, 0xb2, 0x1e];
const TPUB_VERSION: [u8; 4] = [0x04, 0x35, 0x87, 0xcf];

/// SLIP-132 version bytes and the standard version they stand in for.
const SLIP132_VERSIONS: &[([u8; 4], [u8; 4])] = &[
    ([0x04, 0x9d, 0x7c, 0xb2], XPUB_VERSION), // ypub
    ([0x02, 0x95, 0xb4, 0x3f], XPUB_VERSION), // Ypub
    ([0x04, 0xb2, 0x47, 0x46], XPUB_VERSION), // zpub
    ([0x02, 0xaa, 0x7e, 0xd3], XPUB_VERSION), // Zpub
    ([0x04, 0x4a, 0x52, 0x62], TPUB_VERSION), // upub
    ([0x02, 0x42, 0x89, 0xef], TPUB_VERSION), // Upub
    ([0x04, 0x5f, 0x1c, 0xf6], TPUB_VERSION), // vpub
    ([0x02, 0x57, 0x54, 0x83], TPUB_VERSION), // Vpub
];

/// Re-encode a SLIP-132 extended key (`ypub`, `Zpub`, `vpub`, ...) with the
/// plain `xpub`/`tpub` version. Other keys are returned unchanged.
pub fn normalize_xpub(raw: &str) -> Result<String, MultisigError> {
    let trimmed = raw.trim();
    let mut data = base58::decode_check(trimmed)
        .map_err(|e| MultisigError::InvalidXpub(format!("{}: {}", short(trimmed), e)))?;
    if data.len() != 78 {
        return Err(MultisigError::InvalidXpub(format!(
            "{}: expected 78 bytes, got {}",
            short(trimmed),
            data.len()
        )));
    }

    let version = [data[0], data[1], data[2], data[3]];
    match SLIP132_VERSIONS.iter().find(|(slip, _)| *slip == version) {
        Some((_, standard)) => {
            data[..4].copy_from_slice(standard);
            Ok(base58::encode_check(&data))
        }
        None => Ok(trimmed.to_string()),
    }
}

/// Parse an extended public key (normalizing SLIP-132 prefixes) and check
/// that it belongs to `network`.
pub fn parse_xpub(raw: &str, network: Network) -> Result<Xpub, MultisigError> {
    let normalized = normalize_xpub(raw)?;
    let xpub = Xpub::from_str(&normalized)
        .map_err(|e| MultisigError::InvalidXpub(format!("{}: {}", short(raw.trim()), e)))?;

    let expected = NetworkKind::from(network);
    if xpub.network != expected {
        return Err(MultisigError::NetworkMismatch {
            key: short(raw.trim()),
            expected: network,
        });
    }
    Ok(xpub)
}

fn short(key: &str) -> String {
    key.chars().take(12).collect::<String>() + "..."
}

/// An address derived at one index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedAddress {
    pub address: String,
    pub index: u32,
    pub script_type: AddressType,
    pub redeem_script: String,
}

/// Compressed child keys at `0/index`, sorted by their full 33-byte
/// serialization (BIP67).
pub fn sorted_child_keys<C: Verification>(
    secp: &Secp256k1<C>,
    keys: &[Xpub],
    index: u32,
) -> Result<Vec<PublicKey>, MultisigError> {
    let path = [
        ChildNumber::from_normal_idx(0)?,
        ChildNumber::from_normal_idx(index)?,
    ];

    let mut children = keys
        .iter()
        .map(|xpub| -> Result<PublicKey, MultisigError> {
            Ok(PublicKey::new(xpub.derive_pub(secp, &path)?.public_key))
        })
        .collect::<Result<Vec<_>, _>>()?;
    children.sort_by_key(|key| key.inner.serialize());
    Ok(children)
}

pub fn multisig_script(required: u32, keys: &[PublicKey]) -> ScriptBuf {
    let mut builder = Builder::new().push_int(i64::from(required));
    for key in keys {
        builder = builder.push_key(key);
    }
    builder
        .push_int(keys.len() as i64)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script()
}

/// Derive the `required`-of-`keys.len()` address at `index`.
pub fn derive_address<C: Verification>(
    secp: &Secp256k1<C>,
    keys: &[Xpub],
    required: u32,
    address_type: AddressType,
    network: Network,
    index: u32,
) -> Result<DerivedAddress, MultisigError> {
    let children = sorted_child_keys(secp, keys, index)?;
    let script = multisig_script(required, &children);

    let address = match address_type {
        AddressType::P2sh => Address::p2sh(&script, network)
            .map_err(|e| MultisigError::Script(e.to_string()))?,
        AddressType::P2wsh => Address::p2wsh(&script, network),
        AddressType::P2shP2wsh => Address::p2shwsh(&script, network),
    };

    Ok(DerivedAddress {
        address: address.to_string(),
        index,
        script_type: address_type,
        redeem_script: script.to_hex_string(),
    })
}
