//! Screener module - periodic loyalty point recomputation.
//!
//! The pipeline scans token holders and NFT ownership, aggregates weighted
//! points per wallet and rolls them up to users and tiers. Storage, ledger
//! access, address encoding and tier lookup sit behind traits so the
//! aggregation core can run against any backend.

pub mod types;
pub mod error;
pub mod address;
pub mod accumulator;
pub mod ledger;
pub mod storage;
pub mod tiers;
pub mod cache;
pub mod pipeline;
pub mod scheduler;
pub mod config;

// Re-export main public types and the pipeline
pub use pipeline::ScreeningPipeline;
pub use types::{
    CoinHolding, NftCollectionHolding, WalletRecord, UserRecord,
    PassReport, PassStage, ScreenerConfig, TierThreshold,
};
pub use error::{ScreeningError, AddressError, ScreeningResult};

// Re-export collaborators
pub use accumulator::{WalletAccumulator, WalletSnapshot};
pub use address::{AddressCodec, TonAddressCodec};
pub use ledger::{LedgerGateway, TonApiLedger};
pub use storage::{ScreeningStorage, SqliteScreeningStorage};
pub use tiers::{TierResolver, ThresholdTiers};
pub use cache::UserCache;
pub use scheduler::ScreeningScheduler;

/// Screener builder for convenient configuration with sensible defaults.
pub struct ScreenerBuilder {
    config: ScreenerConfig,
}

impl ScreenerBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: ScreenerConfig::default(),
        }
    }

    /// Start from an existing configuration (e.g. one loaded from the environment).
    pub fn from_config(config: ScreenerConfig) -> Self {
        Self { config }
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = url.into();
        self
    }

    /// Set the indexer endpoint and optional API key.
    pub fn with_tonapi(mut self, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        self.config.tonapi_base_url = base_url.into();
        self.config.tonapi_key = api_key;
        self
    }

    pub fn with_ledger_decimals(mut self, decimals: u32) -> Self {
        self.config.ledger_decimals = decimals;
        self
    }

    /// Set rate limiting.
    pub fn with_rate_limit(mut self, requests_per_second: u32) -> Self {
        self.config.rate_limit_requests_per_second = requests_per_second;
        self
    }

    pub fn with_max_parallel_fetches(mut self, max_fetches: usize) -> Self {
        self.config.max_parallel_fetches = max_fetches;
        self
    }

    pub fn with_interval(mut self, seconds: u64) -> Self {
        self.config.screen_interval_seconds = seconds;
        self
    }

    pub fn with_tiers(mut self, tiers: Vec<TierThreshold>) -> Self {
        self.config.tiers = tiers;
        self
    }

    /// Address flavour used for stored wallets.
    pub fn with_address_format(mut self, bounceable: bool, testnet: bool) -> Self {
        self.config.bounceable = bounceable;
        self.config.testnet = testnet;
        self
    }

    pub fn with_user_cache(mut self, capacity: u64, ttl_seconds: u64) -> Self {
        self.config.user_cache_capacity = capacity;
        self.config.user_cache_ttl_seconds = ttl_seconds;
        self
    }

    /// Build the configuration.
    pub fn build_config(self) -> ScreenerConfig {
        self.config
    }

    /// Wire the pipeline around the given storage and ledger, using the
    /// configured codec, tier table, cache and fetch limits.
    pub fn build(
        self,
        storage: std::sync::Arc<dyn ScreeningStorage>,
        ledger: std::sync::Arc<dyn LedgerGateway>,
    ) -> ScreeningPipeline {
        let config = self.config;
        let codec = TonAddressCodec::new(config.bounceable, config.testnet);
        let cache = UserCache::new(config.user_cache_capacity, config.user_cache_ttl_seconds);

        ScreeningPipeline::new(
            storage,
            ledger,
            std::sync::Arc::new(codec),
            std::sync::Arc::new(ThresholdTiers::new(config.tiers)),
        )
        .with_ledger_decimals(config.ledger_decimals)
        .with_max_parallel_fetches(config.max_parallel_fetches)
        .with_user_cache(cache)
    }
}

impl Default for ScreenerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
