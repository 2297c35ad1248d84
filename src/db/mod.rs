//! Typed persistence over SQLite.
//!
//! A [`Store`] is opened in one of two namespaces: live or mock. Each logical
//! table exists twice (`X` and `X_mock`) and every query resolves its table
//! through [`Store::table`], whose names are compile-time constants. Table
//! names are never built from caller input.

pub mod address;
pub mod cold_storage;
pub mod connection;
pub mod forwarding;
pub mod migration;
pub mod multisig;
pub mod snapshot;
pub mod strike;

use sqlx::SqlitePool;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("foreign key violation: {0}")]
    ForeignKey(String),

    #[error("invalid record: {0}")]
    Invalid(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StoreError::Conflict(db_err.message().to_string())
            }
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                StoreError::ForeignKey(db_err.message().to_string())
            }
            sqlx::Error::Database(db_err) if db_err.is_check_violation() => {
                StoreError::Invalid(db_err.message().to_string())
            }
            _ => StoreError::Database(err),
        }
    }
}

macro_rules! tables {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// Logical table names.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Table {
            $($variant),*
        }

        impl Table {
            pub const ALL: &'static [Table] = &[$(Table::$variant),*];

            pub const fn live_name(self) -> &'static str {
                match self {
                    $(Table::$variant => $name),*
                }
            }

            pub const fn mock_name(self) -> &'static str {
                match self {
                    $(Table::$variant => concat!($name, "_mock")),*
                }
            }
        }
    };
}

tables! {
    BalanceSnapshots => "balance_snapshots",
    OnchainAddresses => "onchain_addresses",
    AddressBalances => "address_balances",
    ForwardingEvents => "forwarding_events",
    ColdStorageAccounts => "cold_storage_accounts",
    ColdStorageHistory => "cold_storage_history",
    MultisigWallets => "multisig_wallets",
    MultisigXpubs => "multisig_xpubs",
    MultisigAddresses => "multisig_addresses",
    StrikeBalances => "strike_balances",
}

/// Handle to the portfolio database in either the live or the mock namespace.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    mock: bool,
}

impl Store {
    pub(crate) fn from_pool(pool: SqlitePool, mock: bool) -> Self {
        Self { pool, mock }
    }

    /// Physical table name for `table` in this store's namespace.
    pub fn table(&self, table: Table) -> &'static str {
        if self.mock {
            table.mock_name()
        } else {
            table.live_name()
        }
    }

    pub fn is_mock(&self) -> bool {
        self.mock
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub(crate) fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
