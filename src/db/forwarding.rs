use tracing::debug;

use crate::models::{ForwardingEvent, ForwardingFeeDay};

use super::{Store, StoreError, Table};

impl Store {
    pub async fn insert_forwarding_event(&self, event: &ForwardingEvent) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {} (timestamp, chan_id_in, chan_id_out, amount_in, amount_out, fee)
             VALUES (?, ?, ?, ?, ?, ?)",
            self.table(Table::ForwardingEvents)
        );
        sqlx::query(&sql)
            .bind(event.timestamp)
            .bind(&event.chan_id_in)
            .bind(&event.chan_id_out)
            .bind(event.amount_in)
            .bind(event.amount_out)
            .bind(event.fee)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    /// Insert unless an event with the same (timestamp, inbound channel,
    /// outbound channel) triple is already stored. Returns whether a row was
    /// written.
    pub async fn insert_forwarding_event_ignore_duplicate(&self, event: &ForwardingEvent) -> Result<bool, StoreError> {
        let table = self.table(Table::ForwardingEvents);
        let mut tx = self.pool().begin().await?;

        let exists_sql = format!(
            "SELECT COUNT(*) FROM {} WHERE timestamp = ? AND chan_id_in = ? AND chan_id_out = ?",
            table
        );
        let existing: i64 = sqlx::query_scalar(&exists_sql)
            .bind(event.timestamp)
            .bind(&event.chan_id_in)
            .bind(&event.chan_id_out)
            .fetch_one(&mut *tx)
            .await?;

        if existing > 0 {
            debug!(
                "Skipping duplicate forwarding event at {} ({} -> {})",
                event.timestamp, event.chan_id_in, event.chan_id_out
            );
            tx.commit().await?;
            return Ok(false);
        }

        let insert_sql = format!(
            "INSERT INTO {} (timestamp, chan_id_in, chan_id_out, amount_in, amount_out, fee)
             VALUES (?, ?, ?, ?, ?, ?)",
            table
        );
        sqlx::query(&insert_sql)
            .bind(event.timestamp)
            .bind(&event.chan_id_in)
            .bind(&event.chan_id_out)
            .bind(event.amount_in)
            .bind(event.amount_out)
            .bind(event.fee)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    pub async fn get_forwarding_events(&self, from: i64, to: i64) -> Result<Vec<ForwardingEvent>, StoreError> {
        let sql = format!(
            "SELECT timestamp, chan_id_in, chan_id_out, amount_in, amount_out, fee FROM {}
             WHERE timestamp >= ? AND timestamp <= ?
             ORDER BY timestamp ASC, id ASC",
            self.table(Table::ForwardingEvents)
        );
        let rows = sqlx::query_as::<_, ForwardingEvent>(&sql)
            .bind(from)
            .bind(to)
            .fetch_all(self.pool())
            .await?;

        Ok(rows)
    }

    /// Fees earned per UTC day in `[from, to]`, oldest day first.
    pub async fn get_forwarding_events_fees(&self, from: i64, to: i64) -> Result<Vec<ForwardingFeeDay>, StoreError> {
        let sql = format!(
            "SELECT date(timestamp, 'unixepoch') AS date,
                    SUM(fee) AS total_fee,
                    COUNT(*) AS forward_count,
                    SUM(amount_out) AS total_amount_out
             FROM {}
             WHERE timestamp >= ? AND timestamp <= ?
             GROUP BY date(timestamp, 'unixepoch')
             ORDER BY date ASC",
            self.table(Table::ForwardingEvents)
        );
        let rows = sqlx::query_as::<_, ForwardingFeeDay>(&sql)
            .bind(from)
            .bind(to)
            .fetch_all(self.pool())
            .await?;

        Ok(rows)
    }

    pub async fn count_forwarding_events(&self) -> Result<i64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table(Table::ForwardingEvents));
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(self.pool()).await?;
        Ok(count)
    }

    /// Timestamp of the newest stored forwarding event.
    pub async fn get_latest_forwarding_timestamp(&self) -> Result<Option<i64>, StoreError> {
        let sql = format!("SELECT MAX(timestamp) FROM {}", self.table(Table::ForwardingEvents));
        let latest: Option<i64> = sqlx::query_scalar(&sql).fetch_one(self.pool()).await?;
        Ok(latest)
    }
}
