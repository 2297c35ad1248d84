// Load configuration
// Set up logging
// Open the store and build the source adapters
// Start the collectors
// Start HTTP server, stop everything on Ctrl-C

use std::sync::Arc;

use btc_portfolio_tracker::{
    api,
    cache::BalanceCache,
    collector::{
        BalanceFetcher, ForwardingCollector, OnchainCollector, OnchainSettings, PortfolioCollector,
        StrikeCollector,
    },
    config::Config,
    db::Store,
    history::HistoryReconstructor,
    multisig::MultisigDeriver,
    portfolio::PortfolioAggregator,
    rate_limit::RateLimiter,
    sources::{AddressSource, BitcoinNodeAdapter, LightningNodeAdapter, MempoolAdapter, StrikeAdapter},
    state::AppState,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// `catchup <days>` as the first argument.
fn catchup_days(args: &[String]) -> Result<Option<u32>, String> {
    match args.get(1).map(String::as_str) {
        Some("catchup") => {
            let raw = args.get(2).ok_or("usage: btc-portfolio-tracker catchup <days>")?;
            match raw.parse::<u32>() {
                Ok(days) if days > 0 => Ok(Some(days)),
                _ => Err(format!("invalid number of days: {}", raw)),
            }
        }
        _ => Ok(None),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = Config::from_env_and_args(args.iter().skip(1));
    info!(
        "Starting btc-portfolio-tracker ({} mode, database {})",
        if config.mock_mode { "mock" } else { "live" },
        config.database_path.display()
    );

    let store = Store::open(&config.database_path, config.mock_mode).await?;
    let shutdown = CancellationToken::new();

    let lightning = config
        .lightning_enabled
        .then(|| Arc::new(LightningNodeAdapter::with_process_runner(config.lncli.clone(), config.lncli_args.clone())));

    if let Some(days) = catchup_days(&args)? {
        let node = lightning.ok_or("catchup needs LIGHTNING_ENABLED")?;
        let collector = ForwardingCollector::new(store.clone(), node, config.forwarding_poll_interval);
        let inserted = collector.catchup(days).await?;
        info!("Inserted {} forwarding events", inserted);
        store.close().await;
        return Ok(());
    }

    let limiter = Arc::new(RateLimiter::new(config.mempool_rate_limit, config.mempool_rate_window)?);
    let mempool: Arc<dyn AddressSource> = Arc::new(
        MempoolAdapter::new(config.mempool_url.clone(), config.http_timeout, limiter.clone())?
            .with_cancellation(shutdown.clone()),
    );
    let node = config
        .bitcoin_node_enabled
        .then(|| Arc::new(BitcoinNodeAdapter::with_process_runner(config.bitcoin_cli.clone(), config.bitcoin_wallet.clone())));
    let node_source = node.clone().map(|n| n as Arc<dyn AddressSource>);

    if let Some(node) = &node {
        match node.blockchain_info().await {
            Ok(info) => info!("Bitcoin node on {} at height {}", info.chain, info.blocks),
            Err(e) => warn!("Bitcoin node not reachable, relying on mempool: {}", e),
        }
    }

    let cache = Arc::new(BalanceCache::from_config(&config));
    cache.start(config.cache_ttl);

    let settings = OnchainSettings::from_config(&config);
    let collector_fetcher = BalanceFetcher::new(
        node_source.clone(),
        mempool.clone(),
        settings.retry_limit,
        settings.retry_delay,
    );
    // Interactive requests get a single fallback attempt.
    let request_fetcher = BalanceFetcher::new(node_source, mempool, 1, settings.retry_delay);

    let reconstructor = Arc::new(HistoryReconstructor::new(
        store.clone(),
        request_fetcher.clone(),
        lightning.clone(),
        shutdown.clone(),
    ));
    let aggregator = Arc::new(PortfolioAggregator::new(
        store.clone(),
        cache.clone(),
        request_fetcher,
        lightning.clone(),
        reconstructor,
        shutdown.clone(),
    ));
    let deriver = Arc::new(MultisigDeriver::new(store.clone(), node.clone()));

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let onchain = OnchainCollector::new(store.clone(), collector_fetcher, settings).with_cache(cache.clone());
    tasks.push(tokio::spawn(onchain.run(shutdown.clone())));

    let portfolio = PortfolioCollector::new(store.clone(), aggregator.clone(), config.portfolio_poll_interval);
    tasks.push(tokio::spawn(portfolio.run(shutdown.clone())));

    if let Some(node) = &lightning {
        let forwarding = ForwardingCollector::new(store.clone(), node.clone(), config.forwarding_poll_interval);
        tasks.push(tokio::spawn(forwarding.run(shutdown.clone())));
    }

    match &config.strike_api_key {
        Some(key) => {
            let adapter = StrikeAdapter::new(config.strike_api_url.clone(), key.clone(), config.http_timeout)?;
            let strike = StrikeCollector::new(store.clone(), adapter, config.strike_poll_interval);
            tasks.push(tokio::spawn(strike.run(shutdown.clone())));
        }
        None => info!("STRIKE_API_KEY not set, Strike collector disabled"),
    }
    info!("Started {} collectors", tasks.len());

    let app_state = Arc::new(AppState {
        config: config.clone(),
        store: store.clone(),
        cache: cache.clone(),
        aggregator,
        deriver,
        node,
    });
    let app = api::create_router(app_state);

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, shutting down"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
        signal_token.cancel();
    });

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    let server_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_token.cancelled().await })
        .await?;

    shutdown.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            error!("Collector task ended abnormally: {}", e);
        }
    }
    cache.stop().await;
    limiter.stop();
    store.close().await;
    info!("Shutdown complete");

    Ok(())
}
