// Configuration for:
// - Database file and live/mock namespace
// - Server listening address/port
// - Bitcoin node, Lightning node, mempool and Strike endpoints
// - Collector cadences and retry policy
// - Cache settings (size, TTL)

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

const STRIKE_KEY_FLAG: &str = "--strike-api-key=";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub mock_mode: bool,
    pub server_host: String,
    pub server_port: u16,

    pub bitcoin_node_enabled: bool,
    pub bitcoin_cli: String,
    pub bitcoin_wallet: String,

    pub lightning_enabled: bool,
    pub lncli: String,
    pub lncli_args: Vec<String>,

    pub mempool_url: String,
    pub mempool_rate_limit: u32,
    pub mempool_rate_window: Duration,

    pub strike_api_url: String,
    pub strike_api_key: Option<String>,

    pub onchain_poll_interval: Duration,
    pub onchain_request_delay: Duration,
    pub onchain_retry_limit: u32,
    pub onchain_retry_delay: Duration,
    pub portfolio_poll_interval: Duration,
    pub forwarding_poll_interval: Duration,
    pub strike_poll_interval: Duration,

    pub cache_ttl: Duration,
    pub cache_max_capacity: u64,
    pub http_timeout: Duration,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(parse_or(key, default))
}

/// Load `.env` files: first `<exe-dir>/../.env`, then `./.env`. Variables
/// already present in the environment are never overwritten, so the earlier
/// file wins over the later one.
pub fn load_dotenv() {
    let exe_env = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .map(|dir| dir.join("..").join(".env"));

    if let Some(path) = exe_env {
        if dotenv::from_path(&path).is_ok() {
            debug!("Loaded environment from {}", path.display());
        }
    }
    if dotenv::dotenv().is_ok() {
        debug!("Loaded environment from ./.env");
    }
}

/// `--strike-api-key=<key>` from the command line, if given.
pub fn strike_key_from_args<I, S>(args: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    args.into_iter().find_map(|arg| {
        arg.as_ref()
            .strip_prefix(STRIKE_KEY_FLAG)
            .map(str::to_string)
            .filter(|key| !key.is_empty())
    })
}

impl Config {
    /// Build from the process environment after loading dotenv files.
    /// `args` are scanned for the Strike key flag, which overrides the
    /// environment.
    pub fn from_env_and_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        // Read the real environment first so dotenv cannot shadow it.
        let env_strike_key = env::var("STRIKE_API_KEY").ok().filter(|k| !k.is_empty());
        load_dotenv();

        let mut config = Self::from_env_vars();
        config.strike_api_key = strike_key_from_args(args)
            .or(env_strike_key)
            .or_else(|| env::var("STRIKE_API_KEY").ok().filter(|k| !k.is_empty()));
        config
    }

    pub fn from_env() -> Self {
        load_dotenv();
        Self::from_env_vars()
    }

    /// Build from the current process environment only.
    pub fn from_env_vars() -> Self {
        let lncli_args = env::var("LNCLI_ARGS")
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        Self {
            database_path: PathBuf::from(var_or("DATABASE_PATH", "portfolio.db")),
            mock_mode: flag("MOCK_MODE", false),
            server_host: var_or("SERVER_HOST", "127.0.0.1"),
            server_port: parse_or("SERVER_PORT", 8080),

            bitcoin_node_enabled: flag("BITCOIN_NODE_ENABLED", true),
            bitcoin_cli: var_or("BITCOIN_CLI", "bitcoin-cli"),
            bitcoin_wallet: var_or("BITCOIN_WALLET", "watchonly"),

            lightning_enabled: flag("LIGHTNING_ENABLED", true),
            lncli: var_or("LNCLI", "lncli"),
            lncli_args,

            mempool_url: var_or("MEMPOOL_URL", crate::sources::mempool::DEFAULT_BASE_URL),
            mempool_rate_limit: parse_or("MEMPOOL_RATE_LIMIT", 10),
            mempool_rate_window: secs("MEMPOOL_RATE_WINDOW_SECS", 60),

            strike_api_url: var_or("STRIKE_API_URL", crate::sources::strike::DEFAULT_BASE_URL),
            strike_api_key: env::var("STRIKE_API_KEY").ok().filter(|k| !k.is_empty()),

            onchain_poll_interval: secs("ONCHAIN_POLL_INTERVAL_SECS", 1800),
            onchain_request_delay: Duration::from_millis(parse_or("ONCHAIN_REQUEST_DELAY_MS", 1000)),
            onchain_retry_limit: parse_or("ONCHAIN_RETRY_LIMIT", 3),
            onchain_retry_delay: secs("ONCHAIN_RETRY_DELAY_SECS", 5),
            portfolio_poll_interval: secs("PORTFOLIO_POLL_INTERVAL_SECS", 900),
            forwarding_poll_interval: secs("FORWARDING_POLL_INTERVAL_SECS", 300),
            strike_poll_interval: secs("STRIKE_POLL_INTERVAL_SECS", 3600),

            cache_ttl: secs("CACHE_TTL_SECS", 45),
            cache_max_capacity: parse_or("CACHE_MAX_CAPACITY", 10_000),
            http_timeout: secs("HTTP_TIMEOUT_SECS", 30),
        }
    }
}
