//! ScreeningPipeline - one full recomputation of wallet and user points
//!
//! A pass reads the active coins, collections and users, scans each definition
//! against the ledger, accumulates holdings per wallet, persists the finalized
//! wallets and finally rolls wallet totals up into user totals and tiers.
//! Every stage completes before the next one starts and any error aborts the
//! pass before the next write.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::screener::accumulator::{WalletAccumulator, WalletSnapshot};
use crate::screener::address::AddressCodec;
use crate::screener::cache::UserCache;
use crate::screener::error::{ScreeningError, ScreeningResult};
use crate::screener::ledger::LedgerGateway;
use crate::screener::storage::ScreeningStorage;
use crate::screener::tiers::TierResolver;
use crate::screener::types::{
    CoinHolding, NftCollectionHolding, PassReport, PassStage, UserRecord,
};
use crate::types::{
    CoinDefinition, CollectionDefinition, LedgerAddress, NftItemRecord, RawAmount,
};

const DEFAULT_LEDGER_DECIMALS: u32 = 9;
const DEFAULT_MAX_PARALLEL_FETCHES: usize = 4;

pub struct ScreeningPipeline {
    storage: Arc<dyn ScreeningStorage>,
    ledger: Arc<dyn LedgerGateway>,
    codec: Arc<dyn AddressCodec>,
    tiers: Arc<dyn TierResolver>,
    user_cache: Option<UserCache>,
    ledger_scale: f64,
    max_parallel_fetches: usize,
}

impl ScreeningPipeline {
    pub fn new(
        storage: Arc<dyn ScreeningStorage>,
        ledger: Arc<dyn LedgerGateway>,
        codec: Arc<dyn AddressCodec>,
        tiers: Arc<dyn TierResolver>,
    ) -> Self {
        Self {
            storage,
            ledger,
            codec,
            tiers,
            user_cache: None,
            ledger_scale: 10f64.powi(DEFAULT_LEDGER_DECIMALS as i32),
            max_parallel_fetches: DEFAULT_MAX_PARALLEL_FETCHES,
        }
    }

    /// Decimal places of raw ledger balances.
    pub fn with_ledger_decimals(mut self, decimals: u32) -> Self {
        self.ledger_scale = 10f64.powi(decimals as i32);
        self
    }

    /// Upper bound on concurrent ledger fetches within one scan stage.
    pub fn with_max_parallel_fetches(mut self, max_fetches: usize) -> Self {
        self.max_parallel_fetches = max_fetches.clamp(1, Semaphore::MAX_PERMITS);
        self
    }

    /// Cache whose user entries are invalidated after each successful pass.
    pub fn with_user_cache(mut self, cache: UserCache) -> Self {
        self.user_cache = Some(cache);
        self
    }

    /// The profile cache this pipeline invalidates, for read-through lookups.
    pub fn user_cache(&self) -> Option<&UserCache> {
        self.user_cache.as_ref()
    }

    /// Run one complete pass. Callers must not run two passes at once.
    #[instrument(skip(self))]
    pub async fn screen(&self) -> ScreeningResult<PassReport> {
        let started = Instant::now();
        let mut report = PassReport {
            started_at: chrono::Utc::now(),
            ..Default::default()
        };
        info!("Starting screening pass");

        debug!(stage = %PassStage::FetchInputs, "Loading pass inputs");
        let coins = self
            .storage
            .find_active_coins()
            .await
            .map_err(ScreeningError::persistence("find_active_coins"))?;
        let collections = self
            .storage
            .find_active_collections()
            .await
            .map_err(ScreeningError::persistence("find_active_collections"))?;
        let users = self
            .storage
            .find_all_users()
            .await
            .map_err(ScreeningError::persistence("find_all_users"))?;
        info!(
            "Pass inputs: {} coins, {} collections, {} users",
            coins.len(),
            collections.len(),
            users.len()
        );

        let mut accumulator = WalletAccumulator::new(self.codec.clone());

        self.scan_coins(&coins, &mut accumulator, &mut report).await?;
        self.scan_collections(&collections, &mut accumulator, &mut report)
            .await?;

        if accumulator.is_empty() {
            info!("No wallet holds an active coin or collection");
        }

        debug!(stage = %PassStage::FinalizeWallets, "Finalizing {} wallets", accumulator.len());
        accumulator.finalize();
        let snapshot = accumulator.drain()?;

        debug!(stage = %PassStage::PersistWallets, "Persisting {} wallets", snapshot.len());
        let wallets = snapshot.records();
        self.storage
            .update_wallets(&wallets)
            .await
            .map_err(ScreeningError::persistence("update_wallets"))?;
        report.wallets_persisted = wallets.len();

        debug!(stage = %PassStage::RollupUsers, "Rolling up {} users", users.len());
        let users = self.rollup_users(users, &snapshot);

        debug!(stage = %PassStage::PersistUsers, "Persisting {} users", users.len());
        self.storage
            .update_users(&users)
            .await
            .map_err(ScreeningError::persistence("update_users"))?;
        report.users_updated = users.len();

        if let Some(cache) = &self.user_cache {
            cache.invalidate_users(&users).await;
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "Screening pass complete: {} wallets, {} users, {} items skipped in {}ms",
            report.wallets_persisted, report.users_updated, report.items_skipped, report.duration_ms
        );
        Ok(report)
    }

    async fn scan_coins(
        &self,
        coins: &[CoinDefinition],
        accumulator: &mut WalletAccumulator,
        report: &mut PassReport,
    ) -> ScreeningResult<()> {
        debug!(stage = %PassStage::ScanCoins, "Scanning {} coins", coins.len());

        let addresses = coins.iter().map(|coin| coin.address.clone()).collect();
        let holder_lists = self
            .fetch_from_ledger(addresses, |ledger, address| async move {
                ledger.get_holders(&address).await
            })
            .await?;

        for (coin, holders) in coins.iter().zip(holder_lists) {
            debug!("Coin {}: {} holders", coin.address, holders.len());
            report.holders_seen += holders.len();

            for holder in holders {
                let balance = self.to_decimal(holder.balance);
                let holding = CoinHolding {
                    coin_address: coin.address.clone(),
                    balance,
                    points: balance * coin.points_per_coin,
                };
                accumulator.add_coin_contribution(&holder.owner_address, holding)?;
            }
            report.coins_scanned += 1;
        }

        Ok(())
    }

    async fn scan_collections(
        &self,
        collections: &[CollectionDefinition],
        accumulator: &mut WalletAccumulator,
        report: &mut PassReport,
    ) -> ScreeningResult<()> {
        debug!(stage = %PassStage::ScanCollections, "Scanning {} collections", collections.len());

        let addresses = collections
            .iter()
            .map(|collection| collection.address.clone())
            .collect();
        let item_lists = self
            .fetch_from_ledger(addresses, |ledger, address| async move {
                ledger.get_items(&address).await
            })
            .await?;

        for (collection, items) in collections.iter().zip(item_lists) {
            report.items_seen += items.len();

            let (groups, skipped) = group_by_effective_owner(&items, self.codec.as_ref())?;
            report.items_skipped += skipped;
            debug!(
                "Collection {}: {} items across {} owners",
                collection.address,
                items.len(),
                groups.len()
            );

            for (owner, item_addresses) in groups {
                let holding = NftCollectionHolding::new(
                    collection.address.clone(),
                    item_addresses,
                    collection.points_per_item,
                );
                accumulator.add_nft_contribution(&owner, holding)?;
            }
            report.collections_scanned += 1;
        }

        Ok(())
    }

    /// Fetch one result set per address with bounded concurrency.
    /// Results come back in input order; the first failure aborts the rest.
    async fn fetch_from_ledger<T, F, Fut>(
        &self,
        addresses: Vec<LedgerAddress>,
        fetch: F,
    ) -> ScreeningResult<Vec<Vec<T>>>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn LedgerGateway>, LedgerAddress) -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<T>>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel_fetches));
        let mut tasks = JoinSet::new();
        let total = addresses.len();

        for (index, address) in addresses.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let request = fetch(self.ledger.clone(), address.clone());
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (index, address, request.await)
            });
        }

        let mut results: Vec<Option<Vec<T>>> = (0..total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            let (index, address, result) = joined?;
            let records =
                result.map_err(|source| ScreeningError::LedgerFetch { address, source })?;
            results[index] = Some(records);
        }

        Ok(results.into_iter().flatten().collect())
    }

    /// Recompute every user's total from the finalized wallets of this pass.
    fn rollup_users(&self, users: Vec<UserRecord>, snapshot: &WalletSnapshot) -> Vec<UserRecord> {
        users
            .into_iter()
            .map(|mut user| {
                let points: f64 = user
                    .wallets
                    .iter()
                    .map(|wallet| match self.codec.to_ledger(wallet) {
                        Ok(ledger_address) => snapshot.points_for(&ledger_address),
                        Err(e) => {
                            warn!("User {} lists unreadable wallet: {}", user.chat_id, e);
                            0.0
                        }
                    })
                    .sum();

                user.points_total = points;
                user.tier = Some(self.tiers.resolve(points));
                user
            })
            .collect()
    }

    fn to_decimal(&self, raw: RawAmount) -> f64 {
        raw as f64 / self.ledger_scale
    }
}

/// Group item addresses by normalized effective owner.
/// Returns the groups and the number of items without any owner.
fn group_by_effective_owner(
    items: &[NftItemRecord],
    codec: &dyn AddressCodec,
) -> ScreeningResult<(BTreeMap<LedgerAddress, BTreeSet<LedgerAddress>>, usize)> {
    let mut groups: BTreeMap<LedgerAddress, BTreeSet<LedgerAddress>> = BTreeMap::new();
    let mut skipped = 0;

    for item in items {
        let Some(owner) = item.effective_owner() else {
            warn!("NFT item {} has no owner or sale owner, skipping", item.address);
            skipped += 1;
            continue;
        };
        let owner = codec.normalize(owner)?;
        groups.entry(owner).or_default().insert(item.address.clone());
    }

    Ok((groups, skipped))
}
