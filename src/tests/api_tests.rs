//! tests/api_tests.rs - the REST surface end to end

use std::sync::Arc;

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use crate::{
    api::create_router,
    db::Store,
    models::ForwardingEvent,
    sources::AddressSource,
    tests::support::{app_state, fetcher, spawn_server, wallet_descriptor_json, FakeSource, TEST_ADDRESS, TEST_ADDRESS_2},
};

async fn server_with(store: Store, source: FakeSource) -> String {
    let source: Arc<dyn AddressSource> = Arc::new(source);
    spawn_server(create_router(app_state(store, fetcher(None, source), None))).await
}

async fn body(response: reqwest::Response) -> Value {
    response.json().await.unwrap()
}

#[tokio::test]
async fn test_watched_address_endpoints() {
    let store = Store::in_memory(false).await.unwrap();
    let base = server_with(store.clone(), FakeSource::new("mempool")).await;
    let client = Client::new();
    let url = format!("{}/api/onchain/addresses", base);

    let response = client
        .post(&url)
        .json(&json!({"address": TEST_ADDRESS, "label": "Test"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body(response).await;
    assert_eq!(created["data"]["address"], TEST_ADDRESS);
    assert_eq!(created["data"]["label"], "Test");
    let id = created["data"]["id"].as_i64().unwrap();

    let duplicate = client
        .post(&url)
        .json(&json!({"address": TEST_ADDRESS}))
        .send()
        .await
        .unwrap();
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);
    assert!(body(duplicate).await["error"].is_string());

    let invalid = client
        .post(&url)
        .json(&json!({"address": "definitely-not-bitcoin"}))
        .send()
        .await
        .unwrap();
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

    let listed = body(client.get(&url).send().await.unwrap()).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);
    assert!(listed["data"][0]["balance"].is_null());

    let removed = client.delete(format!("{}/{}", url, id)).send().await.unwrap();
    assert_eq!(removed.status(), StatusCode::OK);
    let again = client.delete(format!("{}/{}", url, id)).send().await.unwrap();
    assert_eq!(again.status(), StatusCode::NOT_FOUND);
    let unknown = client.delete(format!("{}/999", url)).send().await.unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    assert!(store.get_active_addresses().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_days_parameter_is_validated() {
    let store = Store::in_memory(false).await.unwrap();
    let base = server_with(store, FakeSource::new("mempool")).await;
    let client = Client::new();

    for days in ["0", "366", "abc", "-1"] {
        let response = client
            .get(format!("{}/api/portfolio/history?days={}", base, days))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "days={}", days);
    }

    for days in ["1", "365", "all"] {
        let response = client
            .get(format!("{}/api/lightning/fees?days={}", base, days))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "days={}", days);
    }

    let missing = client
        .get(format!("{}/api/onchain/history?days=7", base))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_portfolio_current_and_history() {
    let store = Store::in_memory(false).await.unwrap();
    store.add_onchain_address(TEST_ADDRESS, None).await.unwrap();
    store.add_onchain_address(TEST_ADDRESS_2, None).await.unwrap();
    store.add_cold_storage_account("Vault", 10_000, None).await.unwrap();

    let source = FakeSource::new("mempool")
        .with_balance(TEST_ADDRESS, 250_000)
        .with_balance(TEST_ADDRESS_2, 50_000);
    let base = server_with(store, source).await;
    let client = Client::new();

    let current = body(
        client
            .get(format!("{}/api/portfolio/current", base))
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(current["data"]["tracked_addresses"], 300_000);
    assert_eq!(current["data"]["cold_storage"], 10_000);
    assert_eq!(current["data"]["total_liquid"], 300_000);
    assert_eq!(current["data"]["total_portfolio"], 310_000);

    let history = body(
        client
            .get(format!("{}/api/portfolio/history?days=7", base))
            .send()
            .await
            .unwrap(),
    )
    .await;
    let points = history["data"].as_array().unwrap();
    assert_eq!(points.len(), 2);
    assert!(points.iter().all(|p| p["total_portfolio"] == 310_000));

    let address = body(
        client
            .get(format!("{}/api/onchain/history?address={}&days=3", base, TEST_ADDRESS))
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(address["data"]["address"], TEST_ADDRESS);
    assert_eq!(address["data"]["points"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_lightning_forwards_carry_total_count() {
    let store = Store::in_memory(false).await.unwrap();
    let now = chrono::Utc::now().timestamp();
    for (offset, fee) in [(7_200, 10), (3_600, 25)] {
        store
            .insert_forwarding_event(&ForwardingEvent {
                timestamp: now - offset,
                chan_id_in: "800000:1:0".to_string(),
                chan_id_out: "800001:2:1".to_string(),
                amount_in: 10_000 + fee,
                amount_out: 10_000,
                fee,
            })
            .await
            .unwrap();
    }
    let base = server_with(store, FakeSource::new("mempool")).await;

    let response = Client::new()
        .get(format!("{}/api/lightning/forwards?days=1", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-total-count"], "2");
    let events = body(response).await;
    assert_eq!(events["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_offline_account_endpoints() {
    let store = Store::in_memory(false).await.unwrap();
    let base = server_with(store, FakeSource::new("mempool")).await;
    let client = Client::new();
    let url = format!("{}/api/offline/accounts", base);

    let created = client
        .post(&url)
        .json(&json!({"name": "Steel plate", "balance": 21_000, "notes": "basement"}))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let id = body(created).await["data"]["id"].as_i64().unwrap();

    let updated = client
        .put(format!("{}/{}/balance", url, id))
        .json(&json!({"balance": 42_000}))
        .send()
        .await
        .unwrap();
    assert_eq!(updated.status(), StatusCode::OK);
    assert_eq!(body(updated).await["data"]["balance"], 42_000);

    let listed = body(client.get(&url).send().await.unwrap()).await;
    assert_eq!(listed["data"][0]["name"], "Steel plate");
    assert_eq!(listed["data"][0]["needs_warning"], false);

    let missing = client
        .put(format!("{}/999/balance", url))
        .json(&json!({"balance": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    assert_eq!(client.delete(format!("{}/{}", url, id)).send().await.unwrap().status(), StatusCode::OK);
    assert_eq!(
        client.delete(format!("{}/{}", url, id)).send().await.unwrap().status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_multisig_wallet_endpoints() {
    let store = Store::in_memory(false).await.unwrap();
    let base = server_with(store.clone(), FakeSource::new("mempool")).await;
    let client = Client::new();
    let url = format!("{}/api/multisig/wallets", base);

    let imported = client
        .post(&url)
        .body(wallet_descriptor_json("vault-api"))
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .send()
        .await
        .unwrap();
    assert_eq!(imported.status(), StatusCode::CREATED);
    let id = body(imported).await["data"]["id"].as_i64().unwrap();

    let malformed = client.post(&url).body("{\"name\": 1}").send().await.unwrap();
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);

    let generated = client
        .post(format!("{}/{}/addresses/generate", url, id))
        .json(&json!({"count": 2}))
        .send()
        .await
        .unwrap();
    assert_eq!(generated.status(), StatusCode::CREATED);
    let generated = body(generated).await;
    assert_eq!(generated["data"].as_array().unwrap().len(), 2);
    assert_eq!(generated["data"][1]["address_index"], 1);

    let defaulted = client
        .post(format!("{}/{}/addresses/generate", url, id))
        .send()
        .await
        .unwrap();
    assert_eq!(body(defaulted).await["data"].as_array().unwrap().len(), 10);

    let addresses = body(client.get(format!("{}/{}/addresses", url, id)).send().await.unwrap()).await;
    assert_eq!(addresses["data"].as_array().unwrap().len(), 12);
    assert_eq!(store.get_active_addresses().await.unwrap().len(), 12);

    assert_eq!(client.delete(format!("{}/{}", url, id)).send().await.unwrap().status(), StatusCode::OK);
    assert_eq!(
        client.delete(format!("{}/{}", url, id)).send().await.unwrap().status(),
        StatusCode::NOT_FOUND
    );
    assert!(store.get_active_addresses().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cors_allows_any_origin() {
    let store = Store::in_memory(false).await.unwrap();
    let base = server_with(store, FakeSource::new("mempool")).await;

    let response = Client::new()
        .get(format!("{}/api/offline/accounts", base))
        .header(reqwest::header::ORIGIN, "http://localhost:5173")
        .send()
        .await
        .unwrap();
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
}
