use serde::{Deserialize, Serialize};

use super::SECONDS_PER_DAY;

/// Accounts not touched for longer than this are flagged in listings.
pub const COLD_STORAGE_WARNING_DAYS: i64 = 90;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ColdStorageAccount {
    pub id: i64,
    pub name: String,
    pub balance: i64,
    pub last_updated: i64,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ColdStorageHistoryEntry {
    pub id: i64,
    pub account_id: i64,
    pub timestamp: i64,
    pub balance: i64,
    pub previous_balance: i64,
    pub verified: bool,
    pub notes: Option<String>,
}

/// A cold storage account annotated with how stale its balance is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColdStorageEntry {
    #[serde(flatten)]
    pub account: ColdStorageAccount,
    pub days_since_update: i64,
    pub needs_warning: bool,
}

impl ColdStorageEntry {
    pub fn evaluate(account: ColdStorageAccount, now: i64) -> Self {
        let days_since_update = (now - account.last_updated).max(0) / SECONDS_PER_DAY;
        Self {
            account,
            days_since_update,
            needs_warning: days_since_update > COLD_STORAGE_WARNING_DAYS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(last_updated: i64) -> ColdStorageAccount {
        ColdStorageAccount {
            id: 1,
            name: "vault".to_string(),
            balance: 10,
            last_updated,
            notes: None,
        }
    }

    #[test]
    fn warning_starts_after_ninety_days() {
        let now = 1_700_000_000;
        let at_90 = ColdStorageEntry::evaluate(account(now - 90 * SECONDS_PER_DAY), now);
        assert_eq!(at_90.days_since_update, 90);
        assert!(!at_90.needs_warning);

        let at_91 = ColdStorageEntry::evaluate(account(now - 91 * SECONDS_PER_DAY), now);
        assert_eq!(at_91.days_since_update, 91);
        assert!(at_91.needs_warning);
    }

    #[test]
    fn future_timestamps_count_as_fresh() {
        let entry = ColdStorageEntry::evaluate(account(2_000), 1_000);
        assert_eq!(entry.days_since_update, 0);
        assert!(!entry.needs_warning);
    }
}
