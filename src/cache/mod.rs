use std::sync::Mutex;
use std::time::Duration;

use moka::future::Cache;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;
use crate::models::AddressObservation;

pub const DEFAULT_TTL: Duration = Duration::from_secs(45);
const DEFAULT_MAX_CAPACITY: u64 = 10_000;

/// Latest balance observation per address, valid for `ttl` after capture.
///
/// Expired entries are evicted by a single sweeper task owned by the cache
/// rather than on every insert. `get` additionally checks `captured_at`, so an
/// observation that was already old when it was inserted is never served.
pub struct BalanceCache {
    entries: Cache<String, AddressObservation>,
    ttl: Duration,
    sweeper: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl BalanceCache {
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        let entries = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(max_capacity)
            .build();

        Self {
            entries,
            ttl,
            sweeper: Mutex::new(None),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.cache_ttl, config.cache_max_capacity)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The cached observation for `address` if it is no older than the TTL.
    pub async fn get(&self, address: &str) -> Option<AddressObservation> {
        let entry = self.entries.get(address).await?;
        let age = chrono::Utc::now().timestamp() - entry.captured_at;
        if age <= self.ttl.as_secs() as i64 {
            Some(entry)
        } else {
            debug!("Cache entry for {} is stale ({}s old)", address, age);
            None
        }
    }

    pub async fn set(&self, observation: AddressObservation) {
        self.entries
            .insert(observation.address.clone(), observation)
            .await;
    }

    pub async fn invalidate(&self, address: &str) {
        self.entries.invalidate(address).await;
    }

    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }

    /// Spawn the sweeper that evicts expired entries every `interval`.
    /// Starting an already running cache is a no-op.
    pub fn start(&self, interval: Duration) {
        let Ok(mut sweeper) = self.sweeper.lock() else {
            warn!("Balance cache sweeper lock poisoned; sweeper not started");
            return;
        };
        if sweeper.is_some() {
            return;
        }

        let token = CancellationToken::new();
        let child = token.clone();
        let entries = self.entries.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        entries.run_pending_tasks().await;
                    }
                    _ = child.cancelled() => {
                        debug!("Balance cache sweeper stopping");
                        break;
                    }
                }
            }
        });

        *sweeper = Some((token, handle));
    }

    /// Stop the sweeper and wait for it to exit. Safe to call repeatedly.
    pub async fn stop(&self) {
        let running = match self.sweeper.lock() {
            Ok(mut sweeper) => sweeper.take(),
            Err(_) => None,
        };

        if let Some((token, handle)) = running {
            token.cancel();
            if let Err(e) = handle.await {
                warn!("Balance cache sweeper ended abnormally: {}", e);
            }
        }
    }
}

impl Default for BalanceCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_MAX_CAPACITY)
    }
}

impl Drop for BalanceCache {
    fn drop(&mut self) {
        if let Ok(mut sweeper) = self.sweeper.lock() {
            if let Some((token, _)) = sweeper.take() {
                token.cancel();
            }
        }
    }
}
