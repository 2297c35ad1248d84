//! tests/store_tests.rs - persistence behaviour across both namespaces

use crate::{
    db::{Store, StoreError},
    models::{AddressBalance, ForwardingEvent, PortfolioSnapshot},
    multisig::MultisigDeriver,
    tests::support::{wallet_descriptor_json, TEST_ADDRESS},
};

fn snapshot(timestamp: i64, tracked: i64) -> PortfolioSnapshot {
    PortfolioSnapshot {
        timestamp,
        tracked_addresses: tracked,
        ..PortfolioSnapshot::default()
    }
}

#[tokio::test]
async fn test_snapshot_upsert_keeps_second_payload() {
    let store = Store::in_memory(false).await.unwrap();
    store.insert_balance_snapshot(&snapshot(1_000, 10)).await.unwrap();
    store.insert_balance_snapshot(&snapshot(1_000, 20)).await.unwrap();

    let rows = store.get_balance_snapshots(0, 2_000).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].tracked_addresses, 20);
    assert_eq!(rows[0].total_liquid, 20);
    assert!(rows[0].totals_consistent());
}

#[tokio::test]
async fn test_duplicate_forwarding_event_is_stored_once() {
    let store = Store::in_memory(false).await.unwrap();
    let t = 1_700_000_000;
    let event = ForwardingEvent {
        timestamp: t,
        chan_id_in: "123:1:0".to_string(),
        chan_id_out: "987:1:0".to_string(),
        amount_in: 100_000,
        amount_out: 99_800,
        fee: 200,
    };

    store.insert_forwarding_event(&event).await.unwrap();
    let inserted = store.insert_forwarding_event_ignore_duplicate(&event).await.unwrap();
    assert!(!inserted);
    assert_eq!(store.count_forwarding_events().await.unwrap(), 1);

    let fees = store.get_forwarding_events_fees(t - 3_600, t + 3_600).await.unwrap();
    assert_eq!(fees.len(), 1);
    assert_eq!(fees[0].total_fee, 200);
    assert_eq!(fees[0].forward_count, 1);
    assert_eq!(fees[0].total_amount_out, 99_800);

    assert_eq!(store.get_latest_forwarding_timestamp().await.unwrap(), Some(t));
}

#[tokio::test]
async fn test_mock_and_live_namespaces_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("portfolio.db");

    let live = Store::open(&path, false).await.unwrap();
    let mock = Store::open(&path, true).await.unwrap();

    live.insert_balance_snapshot(&snapshot(100, 1_000_000)).await.unwrap();
    mock.insert_balance_snapshot(&snapshot(200, 2_000_000)).await.unwrap();

    let from_live = live.get_latest_balance_snapshot().await.unwrap().unwrap();
    let from_mock = mock.get_latest_balance_snapshot().await.unwrap().unwrap();
    assert_eq!(from_live.tracked_addresses, 1_000_000);
    assert_eq!(from_mock.tracked_addresses, 2_000_000);

    assert_eq!(live.get_balance_snapshots(0, i64::MAX).await.unwrap().len(), 1);
    assert_eq!(mock.get_balance_snapshots(0, i64::MAX).await.unwrap().len(), 1);

    live.close().await;
    mock.close().await;
}

#[tokio::test]
async fn test_watched_address_lifecycle() {
    let store = Store::in_memory(false).await.unwrap();
    let added = store.add_onchain_address(TEST_ADDRESS, Some("Test")).await.unwrap();
    assert!(added.active);
    assert_eq!(added.label.as_deref(), Some("Test"));

    assert!(matches!(
        store.add_onchain_address(TEST_ADDRESS, None).await,
        Err(StoreError::Conflict(_))
    ));

    store.deactivate_onchain_address(added.id).await.unwrap();
    assert!(store.get_active_addresses().await.unwrap().is_empty());
    assert_eq!(store.list_onchain_addresses(true).await.unwrap().len(), 1);

    let again = store.add_onchain_address(TEST_ADDRESS, None).await.unwrap();
    assert_eq!(again.id, added.id);
    assert!(again.active);
    assert_eq!(again.label.as_deref(), Some("Test"));
}

#[tokio::test]
async fn test_address_balance_one_row_per_timestamp() {
    let store = Store::in_memory(false).await.unwrap();
    let watched = store.add_onchain_address(TEST_ADDRESS, None).await.unwrap();
    let observed = |balance, tx_count| AddressBalance {
        address_id: watched.id,
        timestamp: 1_700_000_000,
        balance,
        tx_count,
    };

    store.insert_address_balance(&observed(10_000, 1)).await.unwrap();
    store.insert_address_balance(&observed(25_000, 2)).await.unwrap();

    let rows = store
        .get_address_balance_history(TEST_ADDRESS, 0, 2_000_000_000)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].balance, 25_000);
    assert_eq!(rows[0].tx_count, 2);

    assert!(matches!(
        store.insert_address_balance(&observed(-1, 2)).await,
        Err(StoreError::Invalid(_))
    ));
    assert!(matches!(
        store.insert_address_balance(&observed(1, -2)).await,
        Err(StoreError::Invalid(_))
    ));
    let latest = store.get_latest_address_balance(watched.id).await.unwrap().unwrap();
    assert_eq!(latest.balance, 25_000);
}

#[tokio::test]
async fn test_cold_storage_accounts() {
    let store = Store::in_memory(false).await.unwrap();
    let vault = store.add_cold_storage_account("Vault", 1_000, None).await.unwrap();
    store.add_cold_storage_account("Safe", 500, Some("steel plate")).await.unwrap();

    assert!(matches!(
        store.add_cold_storage_account("Vault", 1, None).await,
        Err(StoreError::Conflict(_))
    ));

    store.update_cold_storage_balance(vault.id, 1_500, true, None).await.unwrap();
    // Re-verifying the same balance leaves no history entry.
    store.update_cold_storage_balance(vault.id, 1_500, true, None).await.unwrap();

    let history = store.get_cold_storage_history(vault.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].previous_balance, 1_000);
    assert_eq!(history[0].balance, 1_500);

    assert_eq!(store.get_cold_storage_total().await.unwrap(), 2_000);

    let entries = store.get_cold_storage_entries_with_warnings().await.unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| !e.needs_warning && e.days_since_update == 0));

    store.delete_cold_storage_account(vault.id).await.unwrap();
    assert!(matches!(
        store.delete_cold_storage_account(vault.id).await,
        Err(StoreError::NotFound(_))
    ));
    assert_eq!(store.get_cold_storage_total().await.unwrap(), 500);
}

#[tokio::test]
async fn test_strike_balances_keep_latest_per_currency() {
    use crate::models::StrikeBalance;

    let store = Store::in_memory(false).await.unwrap();
    let btc = |total| StrikeBalance {
        currency: "BTC".to_string(),
        available: total,
        total,
    };

    store.insert_strike_balance(100, &btc(1_000)).await.unwrap();
    store.insert_strike_balance(200, &btc(2_000)).await.unwrap();
    store.insert_strike_balance(200, &btc(2_500)).await.unwrap();

    let latest = store.get_latest_strike_balances().await.unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].timestamp, 200);
    assert_eq!(latest[0].total, 2_500);
}

#[tokio::test]
async fn test_multisig_generation_and_deletion() {
    let store = Store::in_memory(false).await.unwrap();
    let deriver = MultisigDeriver::new(store.clone(), None);

    let wallet = deriver
        .import_wallet_json(&wallet_descriptor_json("vault-1"))
        .await
        .unwrap();
    assert_eq!(wallet.next_index, 0);
    assert!(matches!(
        deriver.import_wallet_json(&wallet_descriptor_json("vault-1")).await,
        Err(crate::multisig::MultisigError::Store(StoreError::Conflict(_)))
    ));

    let first = deriver.generate_addresses(wallet.id, 2).await.unwrap();
    assert_eq!(
        first.iter().map(|a| a.address_index).collect::<Vec<_>>(),
        vec![0, 1]
    );
    assert_eq!(
        first[0].address,
        "bc1qrldeu7e6mr3ul2ne2r3flanlc8udekrnfyvw33cytukgvzx4q0uq2tl5m7"
    );

    let second = deriver.generate_addresses(wallet.id, 2).await.unwrap();
    assert_eq!(
        second.iter().map(|a| a.address_index).collect::<Vec<_>>(),
        vec![2, 3]
    );
    assert_eq!(store.get_multisig_wallet(wallet.id).await.unwrap().next_index, 4);

    let watched = store.get_active_addresses().await.unwrap();
    assert_eq!(watched.len(), 4);
    assert_eq!(
        watched
            .iter()
            .find(|w| w.address == first[0].address)
            .and_then(|w| w.label.clone())
            .as_deref(),
        Some("Family Vault [2/3] - #0")
    );

    deriver.delete_wallet(wallet.id).await.unwrap();
    assert!(store.get_active_addresses().await.unwrap().is_empty());
    assert!(deriver.list_wallets().await.unwrap().is_empty());
    assert!(matches!(
        deriver.delete_wallet(wallet.id).await,
        Err(crate::multisig::MultisigError::Store(StoreError::NotFound(_)))
    ));
}
