use std::collections::HashMap;

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, error, info};

use crate::models::{
    AddressType, ExtendedPubKey, MultisigAddress, MultisigWallet, NewExtendedPubKey,
    NewMultisigWallet, WalletNetwork,
};

use super::{now_unix, Store, StoreError, Table};

const WALLET_COLUMNS: &str = "id, uuid, name, address_type, network, required_signers, total_signers, \
     starting_index, next_index, active, created_at, last_scanned";

fn column_u32(row: &SqliteRow, column: &str) -> Result<u32, StoreError> {
    let value: i64 = row.try_get(column)?;
    u32::try_from(value).map_err(|_| StoreError::Invalid(format!("{} out of range: {}", column, value)))
}

fn wallet_from_row(row: &SqliteRow) -> Result<MultisigWallet, StoreError> {
    let address_type: String = row.try_get("address_type")?;
    let network: String = row.try_get("network")?;

    Ok(MultisigWallet {
        id: row.try_get("id")?,
        uuid: row.try_get("uuid")?,
        name: row.try_get("name")?,
        address_type: address_type
            .parse::<AddressType>()
            .map_err(|e| StoreError::Invalid(e.to_string()))?,
        network: network
            .parse::<WalletNetwork>()
            .map_err(|e| StoreError::Invalid(e.to_string()))?,
        required_signers: column_u32(row, "required_signers")?,
        total_signers: column_u32(row, "total_signers")?,
        starting_index: column_u32(row, "starting_index")?,
        next_index: column_u32(row, "next_index")?,
        active: row.try_get::<i64, _>("active")? != 0,
        created_at: row.try_get("created_at")?,
        last_scanned: row.try_get("last_scanned")?,
    })
}

fn key_from_row(row: &SqliteRow) -> Result<ExtendedPubKey, StoreError> {
    Ok(ExtendedPubKey {
        wallet_id: row.try_get("wallet_id")?,
        key_index: column_u32(row, "key_index")?,
        name: row.try_get("name")?,
        xpub: row.try_get("xpub")?,
        bip32_path: row.try_get("bip32_path")?,
        fingerprint: row.try_get("fingerprint")?,
    })
}

fn address_from_row(row: &SqliteRow) -> Result<MultisigAddress, StoreError> {
    let script_type: String = row.try_get("script_type")?;
    Ok(MultisigAddress {
        wallet_id: row.try_get("wallet_id")?,
        address: row.try_get("address")?,
        address_index: column_u32(row, "address_index")?,
        script_type: script_type
            .parse::<AddressType>()
            .map_err(|e| StoreError::Invalid(e.to_string()))?,
        redeem_script: row.try_get("redeem_script")?,
    })
}

impl Store {
    /// Insert a wallet and its `n` key rows in one transaction. A duplicate
    /// uuid yields [`StoreError::Conflict`].
    pub async fn insert_multisig_wallet(
        &self,
        wallet: &NewMultisigWallet,
        keys: &[NewExtendedPubKey],
    ) -> Result<MultisigWallet, StoreError> {
        if wallet.required_signers < 1 || wallet.required_signers > wallet.total_signers {
            return Err(StoreError::Invalid(format!(
                "quorum {}-of-{} is not satisfiable",
                wallet.required_signers, wallet.total_signers
            )));
        }
        if keys.len() != wallet.total_signers as usize {
            return Err(StoreError::Invalid(format!(
                "wallet declares {} signers but {} keys were supplied",
                wallet.total_signers,
                keys.len()
            )));
        }

        let wallets = self.table(Table::MultisigWallets);
        let xpubs = self.table(Table::MultisigXpubs);
        let mut tx = self.pool().begin().await?;

        let insert_wallet = format!(
            "INSERT INTO {} (uuid, name, address_type, network, required_signers, total_signers,
                             starting_index, next_index, active, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
            wallets
        );
        let result = sqlx::query(&insert_wallet)
            .bind(&wallet.uuid)
            .bind(&wallet.name)
            .bind(wallet.address_type.as_str())
            .bind(wallet.network.as_str())
            .bind(i64::from(wallet.required_signers))
            .bind(i64::from(wallet.total_signers))
            .bind(i64::from(wallet.starting_index))
            .bind(i64::from(wallet.starting_index))
            .bind(now_unix())
            .execute(&mut *tx)
            .await
            .map_err(|e| match StoreError::from(e) {
                StoreError::Conflict(_) => {
                    StoreError::Conflict(format!("multisig wallet {} already exists", wallet.uuid))
                }
                other => other,
            })?;
        let wallet_id = result.last_insert_rowid();

        let insert_key = format!(
            "INSERT INTO {} (wallet_id, key_index, name, xpub, bip32_path, fingerprint)
             VALUES (?, ?, ?, ?, ?, ?)",
            xpubs
        );
        for (index, key) in keys.iter().enumerate() {
            sqlx::query(&insert_key)
                .bind(wallet_id)
                .bind(index as i64)
                .bind(&key.name)
                .bind(&key.xpub)
                .bind(&key.bip32_path)
                .bind(&key.fingerprint)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        info!(
            "Stored multisig wallet '{}' ({}-of-{} {}) as id {}",
            wallet.name, wallet.required_signers, wallet.total_signers, wallet.address_type, wallet_id
        );

        self.get_multisig_wallet(wallet_id).await
    }

    pub async fn get_multisig_wallet(&self, id: i64) -> Result<MultisigWallet, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ?",
            WALLET_COLUMNS,
            self.table(Table::MultisigWallets)
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("multisig wallet {}", id)))?;
        wallet_from_row(&row)
    }

    pub async fn get_multisig_wallet_by_uuid(&self, uuid: &str) -> Result<Option<MultisigWallet>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE uuid = ?",
            WALLET_COLUMNS,
            self.table(Table::MultisigWallets)
        );
        let row = sqlx::query(&sql).bind(uuid).fetch_optional(self.pool()).await?;
        row.as_ref().map(wallet_from_row).transpose()
    }

    pub async fn list_multisig_wallets(&self, include_inactive: bool) -> Result<Vec<MultisigWallet>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} {} ORDER BY id ASC",
            WALLET_COLUMNS,
            self.table(Table::MultisigWallets),
            if include_inactive { "" } else { "WHERE active = 1" }
        );
        let rows = sqlx::query(&sql).fetch_all(self.pool()).await?;
        rows.iter().map(wallet_from_row).collect()
    }

    /// Key rows of a wallet ordered by key index.
    pub async fn get_multisig_keys(&self, wallet_id: i64) -> Result<Vec<ExtendedPubKey>, StoreError> {
        let sql = format!(
            "SELECT wallet_id, key_index, name, xpub, bip32_path, fingerprint FROM {}
             WHERE wallet_id = ? ORDER BY key_index ASC",
            self.table(Table::MultisigXpubs)
        );
        let rows = sqlx::query(&sql).bind(wallet_id).fetch_all(self.pool()).await?;
        rows.iter().map(key_from_row).collect()
    }

    /// Active derived addresses of a wallet ordered by derivation index.
    pub async fn get_multisig_addresses(&self, wallet_id: i64) -> Result<Vec<MultisigAddress>, StoreError> {
        let sql = format!(
            "SELECT wallet_id, address, address_index, script_type, redeem_script FROM {}
             WHERE wallet_id = ? AND active = 1 ORDER BY address_index ASC",
            self.table(Table::MultisigAddresses)
        );
        let rows = sqlx::query(&sql).bind(wallet_id).fetch_all(self.pool()).await?;
        rows.iter().map(address_from_row).collect()
    }

    /// Stored addresses with `start <= index < end`, keyed by index.
    pub async fn get_multisig_addresses_in_range(
        &self,
        wallet_id: i64,
        start: u32,
        end: u32,
    ) -> Result<HashMap<u32, MultisigAddress>, StoreError> {
        let sql = format!(
            "SELECT wallet_id, address, address_index, script_type, redeem_script FROM {}
             WHERE wallet_id = ? AND address_index >= ? AND address_index < ?",
            self.table(Table::MultisigAddresses)
        );
        let rows = sqlx::query(&sql)
            .bind(wallet_id)
            .bind(i64::from(start))
            .bind(i64::from(end))
            .fetch_all(self.pool())
            .await?;

        let mut by_index = HashMap::with_capacity(rows.len());
        for row in &rows {
            let address = address_from_row(row)?;
            by_index.insert(address.address_index, address);
        }
        Ok(by_index)
    }

    /// Persist one generated batch atomically: new address rows, their
    /// watched-address registrations and the advanced `next_index`. The
    /// `next_index` update only applies if it still equals `expected_next`;
    /// a concurrent batch that moved it first turns this one into a conflict.
    pub async fn record_generated_addresses(
        &self,
        wallet: &MultisigWallet,
        batch: &[MultisigAddress],
        new_addresses: &[MultisigAddress],
        expected_next: u32,
        new_next: u32,
    ) -> Result<(), StoreError> {
        let addresses = self.table(Table::MultisigAddresses);
        let watched = self.table(Table::OnchainAddresses);
        let wallets = self.table(Table::MultisigWallets);
        let now = now_unix();
        let mut tx = self.pool().begin().await?;

        let insert_address = format!(
            "INSERT INTO {} (wallet_id, address, address_index, script_type, redeem_script, active, created_at)
             VALUES (?, ?, ?, ?, ?, 1, ?)",
            addresses
        );
        for address in new_addresses {
            sqlx::query(&insert_address)
                .bind(wallet.id)
                .bind(&address.address)
                .bind(i64::from(address.address_index))
                .bind(address.script_type.as_str())
                .bind(&address.redeem_script)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }

        let register = format!(
            "INSERT INTO {} (address, label, active, created_at) VALUES (?, ?, 1, ?)
             ON CONFLICT(address) DO UPDATE SET active = 1, label = excluded.label",
            watched
        );
        for address in batch {
            sqlx::query(&register)
                .bind(&address.address)
                .bind(wallet.address_label(address.address_index))
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }

        let advance = format!(
            "UPDATE {} SET next_index = ? WHERE id = ? AND next_index = ? AND active = 1",
            wallets
        );
        let result = sqlx::query(&advance)
            .bind(i64::from(new_next))
            .bind(wallet.id)
            .bind(i64::from(expected_next))
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "multisig wallet {} changed while generating addresses",
                wallet.id
            )));
        }

        tx.commit().await?;
        debug!(
            "Wallet {} advanced next_index {} -> {} ({} new addresses)",
            wallet.id,
            expected_next,
            new_next,
            new_addresses.len()
        );
        Ok(())
    }

    /// Retire a wallet: the wallet and its derived addresses are marked
    /// inactive, then the matching watched addresses are deactivated by label
    /// prefix. A wallet that is already inactive reports `NotFound`, which
    /// makes a repeated delete side-effect free. The label cleanup runs after
    /// the commit and its failure is only logged.
    pub async fn delete_multisig_wallet(&self, id: i64) -> Result<(), StoreError> {
        let wallet = self.get_multisig_wallet(id).await?;
        if !wallet.active {
            return Err(StoreError::NotFound(format!("multisig wallet {}", id)));
        }

        let mut tx = self.pool().begin().await?;
        let deactivate_wallet = format!(
            "UPDATE {} SET active = 0 WHERE id = ? AND active = 1",
            self.table(Table::MultisigWallets)
        );
        let result = sqlx::query(&deactivate_wallet).bind(id).execute(&mut *tx).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("multisig wallet {}", id)));
        }

        let deactivate_addresses = format!(
            "UPDATE {} SET active = 0 WHERE wallet_id = ?",
            self.table(Table::MultisigAddresses)
        );
        sqlx::query(&deactivate_addresses).bind(id).execute(&mut *tx).await?;
        tx.commit().await?;

        match self.deactivate_addresses_by_label_prefix(&wallet.label_prefix()).await {
            Ok(count) => info!(
                "Deleted multisig wallet '{}', stopped tracking {} addresses",
                wallet.name, count
            ),
            Err(e) => error!(
                "Deleted multisig wallet '{}' but failed to untrack its addresses: {}",
                wallet.name, e
            ),
        }
        Ok(())
    }

    pub async fn update_last_scanned(&self, wallet_id: i64, timestamp: i64) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE {} SET last_scanned = ? WHERE id = ?",
            self.table(Table::MultisigWallets)
        );
        let result = sqlx::query(&sql)
            .bind(timestamp)
            .bind(wallet_id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("multisig wallet {}", wallet_id)));
        }
        Ok(())
    }
}
