//! Shared fixtures: scripted command line tools, in-process address sources
//! and local HTTP servers standing in for remote APIs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use tokio_util::sync::CancellationToken;

use crate::cache::BalanceCache;
use crate::collector::BalanceFetcher;
use crate::config::Config;
use crate::db::Store;
use crate::history::HistoryReconstructor;
use crate::models::{AddressObservation, AddressTransaction, Utxo};
use crate::multisig::MultisigDeriver;
use crate::portfolio::PortfolioAggregator;
use crate::sources::{AddressSource, CommandRunner, LightningNodeAdapter, SourceError};
use crate::state::AppState;

pub const TEST_ADDRESS: &str = "bc1qxy2kgdygjrsqtzq2n0yrf2493p83kkfjhx0wlh";
pub const TEST_ADDRESS_2: &str = "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2";
pub const TEST_ADDRESS_3: &str = "3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy";

pub const XPUB_A: &str = "xpub661MyMwAqRbcF3sNQpdi7WvSSMdYvcwTaTiBz53oh7zQ1NGgUbLFBg1XdSGpEhQtgPDgtU9ixX4sWk5A41bMU17pMU8HzwHXVKYdUSEao6A";
pub const XPUB_B: &str = "xpub661MyMwAqRbcGZ81yWmj39K8kKKLvuQ312qVZ9aFeXLMGGZn1um9rfEjtjHRD7L5ivJwm5jeSaXAks6PZhLCSc2bW7MY9doUvhvsd7cNeWJ";
pub const XPUB_C: &str = "xpub661MyMwAqRbcFKRhhDG4HdssaktLvWFt3JydQo7dWMszKxMeW4XQD9jBqm5P1g495kTnXKygzzTFUfE991ZYq2yQCVjekMvLzaHWXrCtTEw";

/// Two-of-three P2WSH wallet descriptor over the three fixture keys.
pub fn wallet_descriptor_json(uuid: &str) -> String {
    format!(
        r#"{{
            "name": "Family Vault",
            "uuid": "{uuid}",
            "addressType": "P2WSH",
            "network": "mainnet",
            "quorum": {{"requiredSigners": 2, "totalSigners": 3}},
            "startingAddressIndex": 0,
            "extendedPublicKeys": [
                {{"name": "Alice", "bip32Path": "m/48'/0'/0'/2'", "xpub": "{XPUB_A}", "xfp": "c858acd9"}},
                {{"name": "Bob", "bip32Path": "m/48'/0'/0'/2'", "xpub": "{XPUB_B}", "xfp": "df3edd60"}},
                {{"name": "Carol", "bip32Path": "m/48'/0'/0'/2'", "xpub": "{XPUB_C}", "xfp": "6c2f6477"}}
            ]
        }}"#
    )
}

/// Canned output per command verb, recording every invocation.
#[derive(Default)]
pub struct ScriptedRunner {
    responses: Mutex<HashMap<String, Result<String, String>>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, verb: &str, stdout: impl Into<String>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(verb.to_string(), Ok(stdout.into()));
        self
    }

    pub fn fail(self, verb: &str, stderr: impl Into<String>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(verb.to_string(), Err(stderr.into()));
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, verb: &str) -> usize {
        self.calls()
            .iter()
            .filter(|args| args.iter().any(|a| a == verb))
            .count()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<String, SourceError> {
        self.calls.lock().unwrap().push(args.to_vec());

        let verb = args
            .iter()
            .find(|a| !a.starts_with('-'))
            .cloned()
            .unwrap_or_default();
        let response = self.responses.lock().unwrap().get(&verb).cloned();

        match response {
            Some(Ok(stdout)) => Ok(stdout),
            Some(Err(stderr)) => Err(SourceError::Command {
                program: program.to_string(),
                status: 1,
                stderr,
            }),
            None => Err(SourceError::Command {
                program: program.to_string(),
                status: 1,
                stderr: format!("no scripted response for '{}'", verb),
            }),
        }
    }
}

/// An address source answering from memory.
pub struct FakeSource {
    name: &'static str,
    balances: HashMap<String, i64>,
    transactions: HashMap<String, Vec<AddressTransaction>>,
    failures_left: AtomicUsize,
    always_fail: bool,
    delay: Option<Duration>,
    balance_calls: AtomicUsize,
}

impl FakeSource {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            balances: HashMap::new(),
            transactions: HashMap::new(),
            failures_left: AtomicUsize::new(0),
            always_fail: false,
            delay: None,
            balance_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_balance(mut self, address: &str, sats: i64) -> Self {
        self.balances.insert(address.to_string(), sats);
        self
    }

    pub fn with_transactions(mut self, address: &str, transactions: Vec<AddressTransaction>) -> Self {
        self.transactions.insert(address.to_string(), transactions);
        self
    }

    pub fn failing(mut self) -> Self {
        self.always_fail = true;
        self
    }

    /// Fail the first `times` balance requests, then answer normally.
    pub fn failing_times(self, times: usize) -> Self {
        self.failures_left.store(times, Ordering::SeqCst);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn balance_calls(&self) -> usize {
        self.balance_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AddressSource for FakeSource {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn balance(&self, address: &str) -> Result<AddressObservation, SourceError> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.always_fail {
            return Err(SourceError::Unavailable(format!("{} is down", self.name)));
        }
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(SourceError::Unavailable(format!("{} hiccup", self.name)));
        }

        let balance = *self
            .balances
            .get(address)
            .ok_or_else(|| SourceError::NotFound(address.to_string()))?;
        let tx_count = self.transactions.get(address).map_or(0, |txs| txs.len() as i64);
        Ok(AddressObservation {
            address: address.to_string(),
            balance,
            tx_count,
            captured_at: chrono::Utc::now().timestamp(),
        })
    }

    async fn utxos(&self, _address: &str) -> Result<Vec<Utxo>, SourceError> {
        Ok(Vec::new())
    }

    async fn transactions(&self, address: &str) -> Result<Vec<AddressTransaction>, SourceError> {
        if self.always_fail {
            return Err(SourceError::Unavailable(format!("{} is down", self.name)));
        }
        Ok(self.transactions.get(address).cloned().unwrap_or_default())
    }

    async fn validate(&self, _address: &str) -> Result<bool, SourceError> {
        Ok(true)
    }
}

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

pub fn fetcher(node: Option<Arc<dyn AddressSource>>, fallback: Arc<dyn AddressSource>) -> BalanceFetcher {
    BalanceFetcher::new(node, fallback, 1, Duration::from_millis(1))
}

/// Application state over `store` with every service wired to `fetcher`.
pub fn app_state(
    store: Store,
    fetcher: BalanceFetcher,
    lightning: Option<Arc<LightningNodeAdapter>>,
) -> Arc<AppState> {
    let shutdown = CancellationToken::new();
    let cache = Arc::new(BalanceCache::default());
    let reconstructor = Arc::new(HistoryReconstructor::new(
        store.clone(),
        fetcher.clone(),
        lightning.clone(),
        shutdown.clone(),
    ));
    let aggregator = Arc::new(PortfolioAggregator::new(
        store.clone(),
        cache.clone(),
        fetcher,
        lightning,
        reconstructor,
        shutdown,
    ));

    Arc::new(AppState {
        config: Config::from_env_vars(),
        store: store.clone(),
        cache,
        aggregator,
        deriver: Arc::new(MultisigDeriver::new(store, None)),
        node: None,
    })
}
