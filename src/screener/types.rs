//! Core types and data structures for the screening pipeline.

use crate::types::{ChatId, LedgerAddress, PersistedAddress};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A wallet's stake in one coin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinHolding {
    pub coin_address: LedgerAddress,
    /// Balance in whole coins
    pub balance: f64,
    /// `balance * points_per_coin`
    pub points: f64,
}

/// A wallet's items in one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NftCollectionHolding {
    pub collection_address: LedgerAddress,
    pub item_addresses: BTreeSet<LedgerAddress>,
    /// `item_addresses.len() * points_per_item`
    pub points: u64,
}

impl NftCollectionHolding {
    pub fn new(
        collection_address: LedgerAddress,
        item_addresses: BTreeSet<LedgerAddress>,
        points_per_item: u64,
    ) -> Self {
        let points = (item_addresses.len() as u64).saturating_mul(points_per_item);
        Self {
            collection_address,
            item_addresses,
            points,
        }
    }

    pub fn item_count(&self) -> usize {
        self.item_addresses.len()
    }
}

/// Per-pass wallet record. Built from contributions, finalized once, persisted, then dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletRecord {
    /// User-friendly address, the storage key
    pub address: PersistedAddress,
    pub coin_holdings: Vec<CoinHolding>,
    pub nft_holdings: Vec<NftCollectionHolding>,
    pub coin_points_total: f64,
    pub nft_points_total: u64,
    pub wallet_points_total: f64,
}

impl WalletRecord {
    pub fn new(address: PersistedAddress) -> Self {
        Self {
            address,
            coin_holdings: Vec::new(),
            nft_holdings: Vec::new(),
            coin_points_total: 0.0,
            nft_points_total: 0,
            wallet_points_total: 0.0,
        }
    }

    /// Recompute all three totals from the current holdings.
    pub(crate) fn compute_totals(&mut self) {
        self.coin_points_total = self.coin_holdings.iter().map(|h| h.points).sum();
        self.nft_points_total = self
            .nft_holdings
            .iter()
            .fold(0u64, |total, h| total.saturating_add(h.points));
        self.wallet_points_total = self.coin_points_total + self.nft_points_total as f64;
    }
}

/// Long-lived user record. Totals are recomputed from scratch every pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub chat_id: ChatId,
    /// Wallets linked by the user, in persisted form
    pub wallets: Vec<PersistedAddress>,
    pub points_total: f64,
    pub tier: Option<String>,
}

impl UserRecord {
    pub fn new(chat_id: ChatId, wallets: Vec<PersistedAddress>) -> Self {
        Self {
            chat_id,
            wallets,
            points_total: 0.0,
            tier: None,
        }
    }
}

/// Stages of one screening pass, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassStage {
    FetchInputs,
    ScanCoins,
    ScanCollections,
    FinalizeWallets,
    PersistWallets,
    RollupUsers,
    PersistUsers,
}

impl PassStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassStage::FetchInputs => "fetch_inputs",
            PassStage::ScanCoins => "scan_coins",
            PassStage::ScanCollections => "scan_collections",
            PassStage::FinalizeWallets => "finalize_wallets",
            PassStage::PersistWallets => "persist_wallets",
            PassStage::RollupUsers => "rollup_users",
            PassStage::PersistUsers => "persist_users",
        }
    }
}

impl std::fmt::Display for PassStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of a completed pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PassReport {
    pub started_at: DateTime<Utc>,
    pub coins_scanned: usize,
    pub collections_scanned: usize,
    pub holders_seen: usize,
    pub items_seen: usize,
    /// NFT items dropped because no owner could be determined
    pub items_skipped: usize,
    pub wallets_persisted: usize,
    pub users_updated: usize,
    pub duration_ms: u64,
}

/// One row of the tier table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierThreshold {
    pub label: String,
    /// Minimum points (inclusive) for this tier
    pub min_points: f64,
}

impl TierThreshold {
    pub fn new(label: impl Into<String>, min_points: f64) -> Self {
        Self {
            label: label.into(),
            min_points,
        }
    }
}

/// Screener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenerConfig {
    /// sqlx connection string for the SQLite store
    pub database_url: String,
    /// Base URL of the tonapi indexer
    pub tonapi_base_url: String,
    /// tonapi bearer token
    pub tonapi_key: Option<String>,
    /// Decimal scale of raw balances
    pub ledger_decimals: u32,
    /// Page size for holder and item listings
    pub page_limit: usize,
    /// Indexer request quota
    pub rate_limit_requests_per_second: u32,
    /// Retry attempts per indexer page
    pub retry_attempts: usize,
    /// HTTP timeout per indexer request
    pub request_timeout_seconds: u64,
    /// Concurrent ledger fetches within one scan stage
    pub max_parallel_fetches: usize,
    /// Delay between scheduled passes
    pub screen_interval_seconds: u64,
    /// Tier table, any order
    pub tiers: Vec<TierThreshold>,
    /// Persist addresses in bounceable form
    pub bounceable: bool,
    /// Persist addresses with the testnet flag
    pub testnet: bool,
    /// Maximum cached user profiles
    pub user_cache_capacity: u64,
    /// Time-to-live of a cached user profile
    pub user_cache_ttl_seconds: u64,
}

pub fn default_tiers() -> Vec<TierThreshold> {
    vec![
        TierThreshold::new("none", 0.0),
        TierThreshold::new("bronze", 100.0),
        TierThreshold::new("silver", 1_000.0),
        TierThreshold::new("gold", 10_000.0),
        TierThreshold::new("platinum", 100_000.0),
    ]
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:./screener.db?mode=rwc".to_string(),
            tonapi_base_url: "https://tonapi.io".to_string(),
            tonapi_key: None,
            ledger_decimals: 9,
            page_limit: 1000,
            rate_limit_requests_per_second: 1,
            retry_attempts: 3,
            request_timeout_seconds: 30,
            max_parallel_fetches: 4,
            screen_interval_seconds: 3600,
            tiers: default_tiers(),
            bounceable: true,
            testnet: false,
            user_cache_capacity: 10_000,
            user_cache_ttl_seconds: 300,
        }
    }
}
