use std::sync::Arc;

use crate::cache::BalanceCache;
use crate::config::Config;
use crate::db::Store;
use crate::history::HistoryReconstructor;
use crate::multisig::MultisigDeriver;
use crate::portfolio::PortfolioAggregator;
use crate::sources::BitcoinNodeAdapter;

pub struct AppState {
    pub config: Config,
    pub store: Store,
    pub cache: Arc<BalanceCache>,
    pub aggregator: Arc<PortfolioAggregator>,
    pub deriver: Arc<MultisigDeriver>,
    /// Present when a node is configured; new addresses are imported into it.
    pub node: Option<Arc<BitcoinNodeAdapter>>,
}

impl AppState {
    pub fn reconstructor(&self) -> &Arc<HistoryReconstructor> {
        self.aggregator.reconstructor()
    }
}
