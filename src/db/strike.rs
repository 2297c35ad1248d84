use crate::models::{StrikeBalance, StrikeBalanceRecord};

use super::{Store, StoreError, Table};

impl Store {
    /// Upsert a currency balance observed at `timestamp`.
    pub async fn insert_strike_balance(&self, timestamp: i64, balance: &StrikeBalance) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {} (timestamp, currency, available, total) VALUES (?, ?, ?, ?)
             ON CONFLICT(timestamp, currency) DO UPDATE SET
                available = excluded.available,
                total = excluded.total",
            self.table(Table::StrikeBalances)
        );
        sqlx::query(&sql)
            .bind(timestamp)
            .bind(&balance.currency)
            .bind(balance.available)
            .bind(balance.total)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// The most recent observation per currency.
    pub async fn get_latest_strike_balances(&self) -> Result<Vec<StrikeBalanceRecord>, StoreError> {
        let table = self.table(Table::StrikeBalances);
        let sql = format!(
            "SELECT s.timestamp, s.currency, s.available, s.total FROM {table} s
             WHERE s.timestamp = (SELECT MAX(timestamp) FROM {table} WHERE currency = s.currency)
             ORDER BY s.currency ASC"
        );
        let rows = sqlx::query_as::<_, StrikeBalanceRecord>(&sql)
            .fetch_all(self.pool())
            .await?;
        Ok(rows)
    }
}
