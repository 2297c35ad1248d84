use tracing::{debug, info};

use crate::models::{ColdStorageAccount, ColdStorageEntry, ColdStorageHistoryEntry};

use super::{now_unix, Store, StoreError, Table};

impl Store {
    pub async fn add_cold_storage_account(
        &self,
        name: &str,
        balance: i64,
        notes: Option<&str>,
    ) -> Result<ColdStorageAccount, StoreError> {
        if name.trim().is_empty() {
            return Err(StoreError::Invalid("account name must not be empty".to_string()));
        }
        if balance < 0 {
            return Err(StoreError::Invalid("balance must not be negative".to_string()));
        }

        let sql = format!(
            "INSERT INTO {} (name, balance, last_updated, notes) VALUES (?, ?, ?, ?)",
            self.table(Table::ColdStorageAccounts)
        );
        let result = sqlx::query(&sql)
            .bind(name.trim())
            .bind(balance)
            .bind(now_unix())
            .bind(notes)
            .execute(self.pool())
            .await
            .map_err(|e| match StoreError::from(e) {
                StoreError::Conflict(_) => {
                    StoreError::Conflict(format!("cold storage account '{}' already exists", name.trim()))
                }
                other => other,
            })?;

        info!("Added cold storage account '{}'", name.trim());
        self.get_cold_storage_account(result.last_insert_rowid()).await
    }

    pub async fn get_cold_storage_account(&self, id: i64) -> Result<ColdStorageAccount, StoreError> {
        let sql = format!(
            "SELECT id, name, balance, last_updated, notes FROM {} WHERE id = ?",
            self.table(Table::ColdStorageAccounts)
        );
        sqlx::query_as::<_, ColdStorageAccount>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("cold storage account {}", id)))
    }

    pub async fn list_cold_storage_accounts(&self) -> Result<Vec<ColdStorageAccount>, StoreError> {
        let sql = format!(
            "SELECT id, name, balance, last_updated, notes FROM {} ORDER BY name ASC",
            self.table(Table::ColdStorageAccounts)
        );
        let rows = sqlx::query_as::<_, ColdStorageAccount>(&sql)
            .fetch_all(self.pool())
            .await?;
        Ok(rows)
    }

    /// Record a new balance for an account. A history entry is written only
    /// when the balance actually changes; `last_updated` always moves so a
    /// re-verification clears the staleness warning.
    pub async fn update_cold_storage_balance(
        &self,
        id: i64,
        new_balance: i64,
        verified: bool,
        notes: Option<&str>,
    ) -> Result<ColdStorageAccount, StoreError> {
        if new_balance < 0 {
            return Err(StoreError::Invalid("balance must not be negative".to_string()));
        }

        let accounts = self.table(Table::ColdStorageAccounts);
        let history = self.table(Table::ColdStorageHistory);
        let now = now_unix();
        let mut tx = self.pool().begin().await?;

        let select_sql = format!("SELECT balance FROM {} WHERE id = ?", accounts);
        let previous: i64 = sqlx::query_scalar(&select_sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("cold storage account {}", id)))?;

        let update_sql = format!(
            "UPDATE {} SET balance = ?, last_updated = ?, notes = COALESCE(?, notes) WHERE id = ?",
            accounts
        );
        sqlx::query(&update_sql)
            .bind(new_balance)
            .bind(now)
            .bind(notes)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if previous != new_balance {
            let history_sql = format!(
                "INSERT INTO {} (account_id, timestamp, balance, previous_balance, verified, notes)
                 VALUES (?, ?, ?, ?, ?, ?)",
                history
            );
            sqlx::query(&history_sql)
                .bind(id)
                .bind(now)
                .bind(new_balance)
                .bind(previous)
                .bind(verified)
                .bind(notes)
                .execute(&mut *tx)
                .await?;
            info!(
                "Cold storage account {} balance changed from {} to {} sats",
                id, previous, new_balance
            );
        } else {
            debug!("Cold storage account {} re-confirmed at {} sats", id, new_balance);
        }

        tx.commit().await?;
        self.get_cold_storage_account(id).await
    }

    pub async fn delete_cold_storage_account(&self, id: i64) -> Result<(), StoreError> {
        let sql = format!("DELETE FROM {} WHERE id = ?", self.table(Table::ColdStorageAccounts));
        let result = sqlx::query(&sql).bind(id).execute(self.pool()).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("cold storage account {}", id)));
        }
        Ok(())
    }

    pub async fn get_cold_storage_history(&self, account_id: i64) -> Result<Vec<ColdStorageHistoryEntry>, StoreError> {
        let sql = format!(
            "SELECT id, account_id, timestamp, balance, previous_balance, verified, notes FROM {}
             WHERE account_id = ? ORDER BY timestamp ASC, id ASC",
            self.table(Table::ColdStorageHistory)
        );
        let rows = sqlx::query_as::<_, ColdStorageHistoryEntry>(&sql)
            .bind(account_id)
            .fetch_all(self.pool())
            .await?;
        Ok(rows)
    }

    pub async fn get_cold_storage_total(&self) -> Result<i64, StoreError> {
        let sql = format!(
            "SELECT COALESCE(SUM(balance), 0) FROM {}",
            self.table(Table::ColdStorageAccounts)
        );
        let total: i64 = sqlx::query_scalar(&sql).fetch_one(self.pool()).await?;
        Ok(total)
    }

    /// Every account annotated with `days_since_update` and `needs_warning`.
    pub async fn get_cold_storage_entries_with_warnings(&self) -> Result<Vec<ColdStorageEntry>, StoreError> {
        let now = now_unix();
        Ok(self
            .list_cold_storage_accounts()
            .await?
            .into_iter()
            .map(|account| ColdStorageEntry::evaluate(account, now))
            .collect())
    }
}
