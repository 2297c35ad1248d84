//! tests/sources_tests.rs - adapters against local stand-ins

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};

use crate::{
    rate_limit::RateLimiter,
    sources::{AddressSource, BitcoinNodeAdapter, LightningNodeAdapter, MempoolAdapter, SourceError, StrikeAdapter},
    tests::support::{spawn_server, ScriptedRunner, TEST_ADDRESS, TEST_ADDRESS_2},
};

fn mempool(base: String) -> MempoolAdapter {
    let limiter = Arc::new(RateLimiter::new(100, Duration::from_secs(1)).unwrap());
    MempoolAdapter::new(base, Duration::from_secs(5), limiter).unwrap()
}

fn confirmed_receipt(txid: String, block_time: i64, address: &str) -> Value {
    json!({
        "txid": txid,
        "vin": [],
        "vout": [{"scriptpubkey_address": address, "value": 1_000}],
        "status": {"confirmed": true, "block_height": 800_000, "block_time": block_time}
    })
}

fn esplora_router() -> Router {
    Router::new()
        .route(
            "/address/{address}",
            get(|Path(address): Path<String>| async move {
                Json(json!({
                    "address": address,
                    "chain_stats": {
                        "funded_txo_count": 3,
                        "funded_txo_sum": 150_000,
                        "spent_txo_count": 1,
                        "spent_txo_sum": 50_000,
                        "tx_count": 3
                    },
                    "mempool_stats": {
                        "funded_txo_count": 1,
                        "funded_txo_sum": 2_000,
                        "spent_txo_count": 0,
                        "spent_txo_sum": 0,
                        "tx_count": 1
                    }
                }))
            }),
        )
        .route(
            "/address/{address}/utxo",
            get(|| async {
                Json(json!([
                    {"txid": "aa", "vout": 1, "value": 100_000, "status": {"confirmed": true, "block_time": 1_700_000_000}},
                    {"txid": "bb", "vout": 0, "value": 2_000, "status": {"confirmed": false}}
                ]))
            }),
        )
        .route(
            "/address/{address}/txs",
            get(
                |Path(address): Path<String>, Query(params): Query<HashMap<String, String>>| async move {
                    let page: Vec<Value> = match params.get("after_txid").map(String::as_str) {
                        None => {
                            let mut page = vec![json!({
                                "txid": "pending",
                                "vin": [],
                                "vout": [{"scriptpubkey_address": address, "value": 500}],
                                "status": {"confirmed": false}
                            })];
                            page.extend(
                                (0..25).map(|i| confirmed_receipt(format!("c{:02}", i), 1_700_100_000 - i, &address)),
                            );
                            page
                        }
                        Some("c24") => vec![confirmed_receipt("older".to_string(), 1_600_000_000, &address)],
                        Some(_) => Vec::new(),
                    };
                    Json(Value::Array(page))
                },
            ),
        )
        .route("/blocks/tip/height", get(|| async { "870000" }))
}

#[tokio::test]
async fn test_mempool_balance_includes_mempool_stats() {
    let adapter = mempool(spawn_server(esplora_router()).await);

    let observation = adapter.balance(TEST_ADDRESS).await.unwrap();
    assert_eq!(observation.address, TEST_ADDRESS);
    assert_eq!(observation.balance, 102_000);
    assert_eq!(observation.tx_count, 4);

    let utxos = adapter.utxos(TEST_ADDRESS).await.unwrap();
    assert_eq!(utxos.len(), 2);
    assert!(utxos[0].confirmed);
    assert!(!utxos[1].confirmed);

    assert_eq!(adapter.tip_height().await.unwrap(), 870_000);
    assert!(adapter.validate(TEST_ADDRESS).await.unwrap());
    assert!(!adapter.validate("not-an-address").await.unwrap());
}

#[tokio::test]
async fn test_mempool_transactions_follow_pages() {
    let adapter = mempool(spawn_server(esplora_router()).await);

    let transactions = adapter.transactions(TEST_ADDRESS).await.unwrap();
    assert_eq!(transactions.len(), 27);
    assert_eq!(transactions[0].txid, "older");
    assert_eq!(transactions.last().unwrap().txid, "pending");
    assert_eq!(transactions.iter().map(|t| t.amount).sum::<i64>(), 26_500);
}

#[tokio::test]
async fn test_mempool_error_statuses() {
    let router = Router::new()
        .route(
            "/address/{address}",
            get(|Path(address): Path<String>| async move {
                match address.as_str() {
                    TEST_ADDRESS => (StatusCode::TOO_MANY_REQUESTS, [(header::RETRY_AFTER, "7")], "slow down").into_response(),
                    TEST_ADDRESS_2 => (StatusCode::NOT_FOUND, "Address not found").into_response(),
                    _ => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
                }
            }),
        );
    let adapter = mempool(spawn_server(router).await);

    match adapter.balance(TEST_ADDRESS).await {
        Err(SourceError::RateLimited { retry_after }) => assert_eq!(retry_after, Some(Duration::from_secs(7))),
        other => panic!("expected rate limit, got {:?}", other),
    }
    assert!(adapter.balance(TEST_ADDRESS_2).await.unwrap_err().is_not_found());
    assert!(matches!(
        adapter.balance("3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy").await,
        Err(SourceError::Http { status: 500, .. })
    ));
}

#[tokio::test]
async fn test_strike_rejects_bad_key() {
    let router = Router::new().route(
        "/v1/balances",
        get(|| async { (StatusCode::UNAUTHORIZED, "unauthorized") }),
    );
    let adapter = StrikeAdapter::new(spawn_server(router).await, "wrong", Duration::from_secs(5)).unwrap();

    assert!(matches!(
        adapter.balances().await,
        Err(SourceError::Http { status: 401, .. })
    ));
}

#[tokio::test]
async fn test_node_import_accepts_known_addresses() {
    let descriptor = json!({"descriptor": format!("addr({})#0a1b2c3d", TEST_ADDRESS), "checksum": "0a1b2c3d"});
    let runner = Arc::new(
        ScriptedRunner::new()
            .respond("getdescriptorinfo", descriptor.to_string())
            .respond(
                "importdescriptors",
                json!([{"success": false, "error": {"code": -4, "message": "Address is already in the wallet"}}])
                    .to_string(),
            ),
    );
    let node = BitcoinNodeAdapter::new("bitcoin-cli", "watch", runner.clone());
    node.import_address(TEST_ADDRESS, "Test").await.unwrap();

    let import = runner
        .calls()
        .into_iter()
        .find(|args| args.iter().any(|a| a == "importdescriptors"))
        .unwrap();
    let request: Value = serde_json::from_str(&import[2]).unwrap();
    assert_eq!(request[0]["label"], "Test");
    assert_eq!(request[0]["timestamp"], 0);

    let rejecting = BitcoinNodeAdapter::new(
        "bitcoin-cli",
        "watch",
        Arc::new(
            ScriptedRunner::new()
                .respond("getdescriptorinfo", descriptor.to_string())
                .respond(
                    "importdescriptors",
                    json!([{"success": false, "error": {"code": -5, "message": "Invalid descriptor"}}]).to_string(),
                ),
        ),
    );
    assert!(matches!(
        rejecting.import_address(TEST_ADDRESS, "").await,
        Err(SourceError::Unavailable(_))
    ));
}

#[tokio::test]
async fn test_node_transactions_are_netted_per_txid() {
    let entries = json!([
        {"address": TEST_ADDRESS, "category": "receive", "amount": 0.5, "txid": "t1", "time": 90, "blocktime": 100},
        {"address": TEST_ADDRESS, "category": "send", "amount": -0.1, "txid": "t2", "time": 200, "blocktime": 210},
        {"address": TEST_ADDRESS, "category": "receive", "amount": 0.03, "txid": "t2", "time": 200, "blocktime": 210},
        {"address": TEST_ADDRESS_2, "category": "receive", "amount": 1.0, "txid": "t3", "time": 300},
        {"address": TEST_ADDRESS, "category": "receive", "amount": 0.001, "txid": "t4", "time": 400}
    ]);
    let runner = Arc::new(ScriptedRunner::new().respond("listtransactions", entries.to_string()));
    let node = BitcoinNodeAdapter::new("bitcoin-cli", "watch", runner);

    let transactions = node.transactions(TEST_ADDRESS).await.unwrap();
    let summary: Vec<(&str, i64, i64)> = transactions
        .iter()
        .map(|t| (t.txid.as_str(), t.block_time, t.amount))
        .collect();
    assert_eq!(
        summary,
        vec![("t1", 100, 50_000_000), ("t2", 210, -7_000_000), ("t4", 400, 100_000)]
    );
}

#[tokio::test]
async fn test_lightning_balances_prefer_millisatoshi() {
    let runner = Arc::new(
        ScriptedRunner::new()
            .respond(
                "channelbalance",
                json!({
                    "local_balance": {"sat": "1", "msat": "1500999"},
                    "remote_balance": {"sat": "2000"}
                })
                .to_string(),
            )
            .respond(
                "walletbalance",
                json!({"confirmed_balance": 25_000, "unconfirmed_balance": "0"}).to_string(),
            ),
    );
    let node = LightningNodeAdapter::new("lncli", vec!["--network=mainnet".to_string()], runner.clone());

    let channels = node.channel_balance().await.unwrap();
    assert_eq!(channels.local, 1_500);
    assert_eq!(channels.remote, 2_000);

    let wallet = node.wallet_balance().await.unwrap();
    assert_eq!(wallet.confirmed, 25_000);
    assert_eq!(wallet.unconfirmed, 0);

    assert_eq!(runner.calls()[0], vec!["--network=mainnet", "channelbalance"]);
}

#[tokio::test]
async fn test_lightning_history_undoes_node_events() {
    let to = 1_700_000_000;
    let runner = Arc::new(
        ScriptedRunner::new()
            .respond(
                "channelbalance",
                json!({"local_balance": {"sat": "40000"}, "remote_balance": {"sat": "60000"}}).to_string(),
            )
            .respond(
                "walletbalance",
                json!({"confirmed_balance": "25000", "unconfirmed_balance": "0"}).to_string(),
            )
            .respond(
                "listinvoices",
                json!({"invoices": [
                    {"settled": true, "state": "SETTLED", "settle_date": (to - 1_000).to_string(), "amt_paid_sat": "5000"},
                    {"settled": false, "state": "OPEN", "creation_date": (to - 900).to_string(), "amt_paid_sat": "0"}
                ]})
                .to_string(),
            )
            .respond(
                "listpayments",
                json!({"payments": [
                    {"status": "SUCCEEDED", "creation_date": (to - 500).to_string(), "value_sat": "1000", "fee_sat": "10"},
                    {"status": "FAILED", "creation_date": (to - 400).to_string(), "value_sat": "9999", "fee_sat": "0"}
                ]})
                .to_string(),
            )
            .respond(
                "listchaintxns",
                json!({"transactions": [{"time_stamp": (to - 200).to_string(), "amount": "3000"}]}).to_string(),
            ),
    );
    let node = LightningNodeAdapter::new("lncli", Vec::new(), runner);

    let points = node.history(to - 2_000, to).await.unwrap();
    let summary: Vec<(i64, i64, i64)> = points.iter().map(|p| (p.timestamp, p.local, p.onchain)).collect();
    assert_eq!(
        summary,
        vec![
            (to - 2_000, 36_010, 22_000),
            (to - 1_000, 41_010, 22_000),
            (to - 500, 40_000, 22_000),
            (to - 200, 40_000, 25_000),
            (to, 40_000, 25_000),
        ]
    );
    assert!(points.iter().all(|p| p.remote == 60_000));
}
