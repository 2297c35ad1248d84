use crate::models::PortfolioSnapshot;

use super::{Store, StoreError, Table};

const SNAPSHOT_COLUMNS: &str = "timestamp, lightning_local, lightning_remote, onchain_confirmed, \
     onchain_unconfirmed, tracked_addresses, cold_storage, total_liquid, total_portfolio";

impl Store {
    /// Upsert a portfolio snapshot keyed by timestamp; a second insert at the
    /// same timestamp replaces the first. Totals are recomputed before writing.
    pub async fn insert_balance_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<(), StoreError> {
        let snapshot = snapshot.clone().with_totals();
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.table(Table::BalanceSnapshots),
            SNAPSHOT_COLUMNS
        );

        sqlx::query(&sql)
            .bind(snapshot.timestamp)
            .bind(snapshot.lightning_local)
            .bind(snapshot.lightning_remote)
            .bind(snapshot.onchain_confirmed)
            .bind(snapshot.onchain_unconfirmed)
            .bind(snapshot.tracked_addresses)
            .bind(snapshot.cold_storage)
            .bind(snapshot.total_liquid)
            .bind(snapshot.total_portfolio)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    /// Snapshots with `from <= timestamp <= to`, oldest first.
    pub async fn get_balance_snapshots(&self, from: i64, to: i64) -> Result<Vec<PortfolioSnapshot>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE timestamp >= ? AND timestamp <= ? ORDER BY timestamp ASC",
            SNAPSHOT_COLUMNS,
            self.table(Table::BalanceSnapshots)
        );

        let rows = sqlx::query_as::<_, PortfolioSnapshot>(&sql)
            .bind(from)
            .bind(to)
            .fetch_all(self.pool())
            .await?;

        Ok(rows)
    }

    pub async fn get_latest_balance_snapshot(&self) -> Result<Option<PortfolioSnapshot>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY timestamp DESC LIMIT 1",
            SNAPSHOT_COLUMNS,
            self.table(Table::BalanceSnapshots)
        );

        let row = sqlx::query_as::<_, PortfolioSnapshot>(&sql)
            .fetch_optional(self.pool())
            .await?;

        Ok(row)
    }
}
