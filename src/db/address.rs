use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

use crate::models::{AddressBalance, AddressBalanceRecord, WatchedAddress, WatchedAddressSummary};

use super::{now_unix, Store, StoreError, Table};

fn watched_address_from_row(row: &SqliteRow) -> Result<WatchedAddress, sqlx::Error> {
    Ok(WatchedAddress {
        id: row.try_get("id")?,
        address: row.try_get("address")?,
        label: row.try_get("label")?,
        active: row.try_get::<i64, _>("active")? != 0,
        created_at: row.try_get("created_at")?,
    })
}

/// Escape LIKE wildcards so a user-chosen name matches only itself.
pub(crate) fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

impl Store {
    /// Start watching `address`. An address that was previously deactivated is
    /// reactivated; one that is already active yields a conflict.
    pub async fn add_onchain_address(
        &self,
        address: &str,
        label: Option<&str>,
    ) -> Result<WatchedAddress, StoreError> {
        let table = self.table(Table::OnchainAddresses);

        if let Some(existing) = self.get_onchain_address_by_string(address).await? {
            if existing.active {
                return Err(StoreError::Conflict(format!("address {} is already tracked", address)));
            }

            let sql = format!("UPDATE {} SET active = 1, label = COALESCE(?, label) WHERE id = ?", table);
            sqlx::query(&sql)
                .bind(label)
                .bind(existing.id)
                .execute(self.pool())
                .await?;
            debug!("Reactivated watched address {}", address);
            return self.get_onchain_address(existing.id).await;
        }

        let sql = format!(
            "INSERT INTO {} (address, label, active, created_at) VALUES (?, ?, 1, ?)",
            table
        );
        let result = sqlx::query(&sql)
            .bind(address)
            .bind(label)
            .bind(now_unix())
            .execute(self.pool())
            .await
            .map_err(|e| match StoreError::from(e) {
                StoreError::Conflict(_) => {
                    StoreError::Conflict(format!("address {} is already tracked", address))
                }
                other => other,
            })?;

        self.get_onchain_address(result.last_insert_rowid()).await
    }

    pub async fn get_onchain_address(&self, id: i64) -> Result<WatchedAddress, StoreError> {
        let sql = format!(
            "SELECT id, address, label, active, created_at FROM {} WHERE id = ?",
            self.table(Table::OnchainAddresses)
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("address {}", id)))?;

        Ok(watched_address_from_row(&row)?)
    }

    pub async fn get_onchain_address_by_string(
        &self,
        address: &str,
    ) -> Result<Option<WatchedAddress>, StoreError> {
        let sql = format!(
            "SELECT id, address, label, active, created_at FROM {} WHERE address = ?",
            self.table(Table::OnchainAddresses)
        );
        let row = sqlx::query(&sql)
            .bind(address)
            .fetch_optional(self.pool())
            .await?;

        Ok(row.as_ref().map(watched_address_from_row).transpose()?)
    }

    pub async fn list_onchain_addresses(&self, include_inactive: bool) -> Result<Vec<WatchedAddress>, StoreError> {
        let sql = format!(
            "SELECT id, address, label, active, created_at FROM {} {} ORDER BY id ASC",
            self.table(Table::OnchainAddresses),
            if include_inactive { "" } else { "WHERE active = 1" }
        );
        let rows = sqlx::query(&sql).fetch_all(self.pool()).await?;

        Ok(rows
            .iter()
            .map(watched_address_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    pub async fn get_active_addresses(&self) -> Result<Vec<WatchedAddress>, StoreError> {
        self.list_onchain_addresses(false).await
    }

    /// Active addresses joined with their most recent balance observation.
    pub async fn list_addresses_with_latest_balance(&self) -> Result<Vec<WatchedAddressSummary>, StoreError> {
        let addresses = self.table(Table::OnchainAddresses);
        let balances = self.table(Table::AddressBalances);
        let sql = format!(
            "SELECT a.id, a.address, a.label, a.active, a.created_at,
                    b.balance AS balance, b.tx_count AS tx_count, b.timestamp AS last_updated
             FROM {addresses} a
             LEFT JOIN {balances} b
               ON b.address_id = a.id
              AND b.timestamp = (SELECT MAX(timestamp) FROM {balances} WHERE address_id = a.id)
             WHERE a.active = 1
             ORDER BY a.id ASC"
        );
        let rows = sqlx::query(&sql).fetch_all(self.pool()).await?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in &rows {
            summaries.push(WatchedAddressSummary {
                address: watched_address_from_row(row)?,
                balance: row.try_get("balance")?,
                tx_count: row.try_get("tx_count")?,
                last_updated: row.try_get("last_updated")?,
            });
        }
        Ok(summaries)
    }

    /// Stop watching an address. Rows are kept so their history stays intact.
    pub async fn deactivate_onchain_address(&self, id: i64) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE {} SET active = 0 WHERE id = ? AND active = 1",
            self.table(Table::OnchainAddresses)
        );
        let result = sqlx::query(&sql).bind(id).execute(self.pool()).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("address {}", id)));
        }
        Ok(())
    }

    /// Deactivate every address whose label starts with `prefix`.
    pub async fn deactivate_addresses_by_label_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let sql = format!(
            "UPDATE {} SET active = 0 WHERE active = 1 AND label LIKE ? ESCAPE '\\'",
            self.table(Table::OnchainAddresses)
        );
        let pattern = format!("{}%", escape_like(prefix));
        let result = sqlx::query(&sql).bind(pattern).execute(self.pool()).await?;
        Ok(result.rows_affected())
    }

    /// Upsert an observation keyed by (address id, timestamp).
    pub async fn insert_address_balance(&self, balance: &AddressBalance) -> Result<(), StoreError> {
        if balance.balance < 0 || balance.tx_count < 0 {
            return Err(StoreError::Invalid(format!(
                "negative balance or tx count for address {}",
                balance.address_id
            )));
        }

        let sql = format!(
            "INSERT INTO {} (address_id, timestamp, balance, tx_count) VALUES (?, ?, ?, ?)
             ON CONFLICT(address_id, timestamp) DO UPDATE SET
                balance = excluded.balance,
                tx_count = excluded.tx_count",
            self.table(Table::AddressBalances)
        );
        sqlx::query(&sql)
            .bind(balance.address_id)
            .bind(balance.timestamp)
            .bind(balance.balance)
            .bind(balance.tx_count)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    /// Observations for `address` in `[from, to]`, oldest first. Unknown
    /// addresses produce an empty list.
    pub async fn get_address_balance_history(
        &self,
        address: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<AddressBalanceRecord>, StoreError> {
        let sql = format!(
            "SELECT a.address AS address, b.timestamp AS timestamp, b.balance AS balance, b.tx_count AS tx_count
             FROM {} b
             JOIN {} a ON a.id = b.address_id
             WHERE a.address = ? AND b.timestamp >= ? AND b.timestamp <= ?
             ORDER BY b.timestamp ASC",
            self.table(Table::AddressBalances),
            self.table(Table::OnchainAddresses)
        );

        let rows = sqlx::query_as::<_, AddressBalanceRecord>(&sql)
            .bind(address)
            .bind(from)
            .bind(to)
            .fetch_all(self.pool())
            .await?;

        Ok(rows)
    }

    pub async fn get_latest_address_balance(&self, address_id: i64) -> Result<Option<AddressBalance>, StoreError> {
        let sql = format!(
            "SELECT address_id, timestamp, balance, tx_count FROM {}
             WHERE address_id = ? ORDER BY timestamp DESC LIMIT 1",
            self.table(Table::AddressBalances)
        );
        let row = sqlx::query_as::<_, AddressBalance>(&sql)
            .bind(address_id)
            .fetch_optional(self.pool())
            .await?;

        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::escape_like;

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("plain"), "plain");
        assert_eq!(escape_like("100%_vault\\"), "100\\%\\_vault\\\\");
    }
}
