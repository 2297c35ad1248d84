use std::str::FromStr;

use bitcoin::bip32::{DerivationPath, Xpub};
use serde::{Deserialize, Serialize};

use crate::models::{AddressType, NewExtendedPubKey, NewMultisigWallet, WalletNetwork};
use crate::validation::{validate_quorum, ValidationError};

use super::derive::{normalize_xpub, parse_xpub};
use super::MultisigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quorum {
    #[serde(alias = "required_signers", alias = "m")]
    pub required_signers: u32,
    #[serde(alias = "total_signers", alias = "n")]
    pub total_signers: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyDescriptor {
    #[serde(default)]
    pub name: String,
    pub xpub: String,
    #[serde(default, alias = "bip32_path", alias = "path")]
    pub bip32_path: String,
    #[serde(default, alias = "fingerprint", alias = "master_fingerprint")]
    pub xfp: String,
}

/// Wallet configuration as exported by common multisig coordinators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletDescriptor {
    pub name: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(alias = "address_type")]
    pub address_type: String,
    pub network: String,
    pub quorum: Quorum,
    #[serde(default, alias = "starting_address_index", alias = "starting_index")]
    pub starting_address_index: u32,
    #[serde(alias = "extended_public_keys")]
    pub extended_public_keys: Vec<KeyDescriptor>,
}

/// A descriptor that passed validation, ready to be stored.
#[derive(Debug, Clone)]
pub struct ValidatedWallet {
    pub wallet: NewMultisigWallet,
    pub keys: Vec<NewExtendedPubKey>,
    pub xpubs: Vec<Xpub>,
}

impl WalletDescriptor {
    pub fn from_json(json: &str) -> Result<Self, MultisigError> {
        serde_json::from_str(json).map_err(|e| MultisigError::Descriptor(e.to_string()))
    }

    /// Check every field and parse every key. Keys are stored in their
    /// normalized `xpub`/`tpub` form.
    pub fn validate(&self) -> Result<ValidatedWallet, MultisigError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ValidationError::MissingParameter("name".to_string()).into());
        }
        let uuid = self.uuid.trim();
        if uuid.is_empty() {
            return Err(ValidationError::MissingParameter("uuid".to_string()).into());
        }

        let address_type = AddressType::from_str(&self.address_type)?;
        let network = WalletNetwork::from_str(&self.network)?;
        validate_quorum(
            self.quorum.required_signers,
            self.quorum.total_signers,
            self.extended_public_keys.len(),
        )?;

        let mut keys = Vec::with_capacity(self.extended_public_keys.len());
        let mut xpubs = Vec::with_capacity(self.extended_public_keys.len());
        for (index, key) in self.extended_public_keys.iter().enumerate() {
            let xpub = parse_xpub(&key.xpub, network.bitcoin_network())?;

            let bip32_path = match key.bip32_path.trim() {
                "" => "m".to_string(),
                path => {
                    DerivationPath::from_str(path).map_err(|e| {
                        ValidationError::InvalidParameter(format!("key {} path '{}': {}", index, path, e))
                    })?;
                    path.to_string()
                }
            };

            let fingerprint = key.xfp.trim().to_ascii_lowercase();
            if !fingerprint.is_empty()
                && (fingerprint.len() != 8 || !fingerprint.chars().all(|c| c.is_ascii_hexdigit()))
            {
                return Err(ValidationError::InvalidParameter(format!(
                    "key {} fingerprint '{}' is not 4 hex bytes",
                    index, key.xfp
                ))
                .into());
            }

            let key_name = match key.name.trim() {
                "" => format!("Key {}", index + 1),
                given => given.to_string(),
            };

            keys.push(NewExtendedPubKey {
                name: key_name,
                xpub: normalize_xpub(&key.xpub)?,
                bip32_path,
                fingerprint,
            });
            xpubs.push(xpub);
        }

        Ok(ValidatedWallet {
            wallet: NewMultisigWallet {
                uuid: uuid.to_string(),
                name: name.to_string(),
                address_type,
                network,
                required_signers: self.quorum.required_signers,
                total_signers: self.quorum.total_signers,
                starting_index: self.starting_address_index,
            },
            keys,
            xpubs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor_json(address_type: &str, m: u32) -> String {
        format!(
            r#"{{
                "name": "Vault",
                "uuid": "vault-1",
                "addressType": "{address_type}",
                "network": "mainnet",
                "quorum": {{"requiredSigners": {m}, "totalSigners": 2}},
                "startingAddressIndex": 0,
                "extendedPublicKeys": [
                    {{"name": "A", "bip32Path": "m/48'/0'/0'/2'", "xpub": "xpub661MyMwAqRbcF3sNQpdi7WvSSMdYvcwTaTiBz53oh7zQ1NGgUbLFBg1XdSGpEhQtgPDgtU9ixX4sWk5A41bMU17pMU8HzwHXVKYdUSEao6A", "xfp": "C858ACD9"}},
                    {{"name": "B", "bip32Path": "m/48'/0'/0'/2'", "xpub": "Zpub6vZyhw1ShkEwPifdatoxHPqwp3eW2W4d9XXc3CdZnJvWzem9HdUZBuQwjrA4mMrpmfcY8cvtF7cmebwHJKKBBZWU5FrniruTMtL2zBisb5L", "xfp": "df3edd60"}}
                ]
            }}"#
        )
    }

    #[test]
    fn caravan_descriptor_validates() {
        let validated = WalletDescriptor::from_json(&descriptor_json("P2WSH", 2))
            .unwrap()
            .validate()
            .unwrap();

        assert_eq!(validated.wallet.address_type, AddressType::P2wsh);
        assert_eq!(validated.wallet.required_signers, 2);
        assert_eq!(validated.keys.len(), 2);
        assert_eq!(validated.keys[0].fingerprint, "c858acd9");
        assert!(validated.keys[1].xpub.starts_with("xpub"));
    }

    #[test]
    fn bad_fields_are_rejected() {
        let unknown_type = WalletDescriptor::from_json(&descriptor_json("P2TR", 2)).unwrap();
        assert!(matches!(unknown_type.validate(), Err(MultisigError::Validation(_))));

        let bad_quorum = WalletDescriptor::from_json(&descriptor_json("P2SH", 3)).unwrap();
        assert!(matches!(bad_quorum.validate(), Err(MultisigError::Validation(_))));

        assert!(matches!(
            WalletDescriptor::from_json("{\"name\": 1}"),
            Err(MultisigError::Descriptor(_))
        ));
    }
}
