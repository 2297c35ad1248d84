use tracing::{debug, info};

use super::{Store, StoreError, Table};

/// Schema for one namespace; `name` maps a logical table to its physical name.
fn schema(name: fn(Table) -> &'static str) -> Vec<String> {
    let snapshots = name(Table::BalanceSnapshots);
    let addresses = name(Table::OnchainAddresses);
    let balances = name(Table::AddressBalances);
    let forwards = name(Table::ForwardingEvents);
    let cold = name(Table::ColdStorageAccounts);
    let cold_history = name(Table::ColdStorageHistory);
    let wallets = name(Table::MultisigWallets);
    let xpubs = name(Table::MultisigXpubs);
    let multisig_addresses = name(Table::MultisigAddresses);
    let strike = name(Table::StrikeBalances);

    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {snapshots} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL UNIQUE,
                lightning_local INTEGER NOT NULL DEFAULT 0,
                lightning_remote INTEGER NOT NULL DEFAULT 0,
                onchain_confirmed INTEGER NOT NULL DEFAULT 0,
                onchain_unconfirmed INTEGER NOT NULL DEFAULT 0,
                tracked_addresses INTEGER NOT NULL DEFAULT 0,
                cold_storage INTEGER NOT NULL DEFAULT 0,
                total_liquid INTEGER NOT NULL DEFAULT 0,
                total_portfolio INTEGER NOT NULL DEFAULT 0,
                CHECK (total_liquid = lightning_local + onchain_confirmed + onchain_unconfirmed + tracked_addresses),
                CHECK (total_portfolio = total_liquid + cold_storage)
            )"
        ),
        format!("CREATE INDEX IF NOT EXISTS idx_{snapshots}_timestamp ON {snapshots}(timestamp)"),
        format!(
            "CREATE TABLE IF NOT EXISTS {addresses} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT NOT NULL UNIQUE,
                label TEXT,
                active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {balances} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address_id INTEGER NOT NULL REFERENCES {addresses}(id),
                timestamp INTEGER NOT NULL,
                balance INTEGER NOT NULL CHECK (balance >= 0),
                tx_count INTEGER NOT NULL CHECK (tx_count >= 0),
                UNIQUE (address_id, timestamp)
            )"
        ),
        format!("CREATE INDEX IF NOT EXISTS idx_{balances}_timestamp ON {balances}(timestamp)"),
        format!(
            "CREATE TABLE IF NOT EXISTS {forwards} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                chan_id_in TEXT NOT NULL,
                chan_id_out TEXT NOT NULL,
                amount_in INTEGER NOT NULL,
                amount_out INTEGER NOT NULL,
                fee INTEGER NOT NULL
            )"
        ),
        format!("CREATE INDEX IF NOT EXISTS idx_{forwards}_timestamp ON {forwards}(timestamp)"),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{forwards}_dedup ON {forwards}(timestamp, chan_id_in, chan_id_out)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {cold} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                balance INTEGER NOT NULL CHECK (balance >= 0),
                last_updated INTEGER NOT NULL,
                notes TEXT
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {cold_history} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL REFERENCES {cold}(id) ON DELETE CASCADE,
                timestamp INTEGER NOT NULL,
                balance INTEGER NOT NULL,
                previous_balance INTEGER NOT NULL,
                verified INTEGER NOT NULL DEFAULT 0,
                notes TEXT
            )"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{cold_history}_timestamp ON {cold_history}(timestamp)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {wallets} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                address_type TEXT NOT NULL,
                network TEXT NOT NULL,
                required_signers INTEGER NOT NULL,
                total_signers INTEGER NOT NULL,
                starting_index INTEGER NOT NULL DEFAULT 0,
                next_index INTEGER NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                last_scanned INTEGER,
                CHECK (required_signers >= 1 AND required_signers <= total_signers),
                CHECK (next_index >= starting_index)
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {xpubs} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                wallet_id INTEGER NOT NULL REFERENCES {wallets}(id),
                key_index INTEGER NOT NULL,
                name TEXT NOT NULL,
                xpub TEXT NOT NULL,
                bip32_path TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                UNIQUE (wallet_id, key_index)
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {multisig_addresses} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                wallet_id INTEGER NOT NULL REFERENCES {wallets}(id),
                address TEXT NOT NULL UNIQUE,
                address_index INTEGER NOT NULL,
                script_type TEXT NOT NULL,
                redeem_script TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                UNIQUE (wallet_id, address_index)
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {strike} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                currency TEXT NOT NULL,
                available INTEGER NOT NULL,
                total INTEGER NOT NULL,
                UNIQUE (timestamp, currency)
            )"
        ),
        format!("CREATE INDEX IF NOT EXISTS idx_{strike}_timestamp ON {strike}(timestamp)"),
    ]
}

/// Create every table of both namespaces.
pub async fn run_migrations(store: &Store) -> Result<(), StoreError> {
    info!("Running database migrations...");

    for (namespace, name) in [
        ("live", Table::live_name as fn(Table) -> &'static str),
        ("mock", Table::mock_name as fn(Table) -> &'static str),
    ] {
        for statement in schema(name) {
            sqlx::query(&statement).execute(store.pool()).await?;
        }
        debug!("Schema ready for {} namespace", namespace);
    }

    info!("Database migrations completed successfully");
    Ok(())
}
