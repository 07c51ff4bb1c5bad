//! End-to-end screening passes against in-memory storage and ledger doubles

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use loyalty_screener::screener::{
    AddressCodec, LedgerGateway, ScreenerBuilder, ScreeningError, ScreeningPipeline,
    ScreeningStorage,
    ThresholdTiers, TierThreshold, TonAddressCodec, UserCache, UserRecord, WalletRecord,
};
use loyalty_screener::types::{
    ChatId, CoinDefinition, CollectionDefinition, HolderRecord, NftItemRecord,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn raw(n: u8) -> String {
    format!("0:{}", hex::encode([n; 32]))
}

fn persisted(n: u8) -> String {
    TonAddressCodec::default().to_persisted(&raw(n)).unwrap()
}

#[derive(Default)]
struct MockStorage {
    coins: Vec<CoinDefinition>,
    collections: Vec<CollectionDefinition>,
    users: Vec<UserRecord>,
    fail_wallet_write: bool,
    fail_user_write: bool,
    wallet_batches: Mutex<Vec<Vec<WalletRecord>>>,
    user_batches: Mutex<Vec<Vec<UserRecord>>>,
}

impl MockStorage {
    fn wallet_batches(&self) -> Vec<Vec<WalletRecord>> {
        self.wallet_batches.lock().unwrap().clone()
    }

    fn user_batches(&self) -> Vec<Vec<UserRecord>> {
        self.user_batches.lock().unwrap().clone()
    }

    fn last_wallets(&self) -> Vec<WalletRecord> {
        self.wallet_batches().last().cloned().unwrap_or_default()
    }

    fn last_users(&self) -> Vec<UserRecord> {
        self.user_batches().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ScreeningStorage for MockStorage {
    async fn find_active_coins(&self) -> Result<Vec<CoinDefinition>> {
        Ok(self.coins.clone())
    }

    async fn find_active_collections(&self) -> Result<Vec<CollectionDefinition>> {
        Ok(self.collections.clone())
    }

    async fn find_all_users(&self) -> Result<Vec<UserRecord>> {
        Ok(self.users.clone())
    }

    async fn find_user(&self, chat_id: ChatId) -> Result<Option<UserRecord>> {
        Ok(self.users.iter().find(|user| user.chat_id == chat_id).cloned())
    }

    async fn update_wallets(&self, wallets: &[WalletRecord]) -> Result<()> {
        if self.fail_wallet_write {
            return Err(anyhow!("database is locked"));
        }
        self.wallet_batches.lock().unwrap().push(wallets.to_vec());
        Ok(())
    }

    async fn update_users(&self, users: &[UserRecord]) -> Result<()> {
        if self.fail_user_write {
            return Err(anyhow!("database is locked"));
        }
        self.user_batches.lock().unwrap().push(users.to_vec());
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

#[derive(Default)]
struct MockLedger {
    holders: HashMap<String, Vec<HolderRecord>>,
    items: HashMap<String, Vec<NftItemRecord>>,
    delays: HashMap<String, u64>,
    failing: HashSet<String>,
}

impl MockLedger {
    async fn respond(&self, address: &str) -> Result<()> {
        if let Some(ms) = self.delays.get(address) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        if self.failing.contains(address) {
            return Err(anyhow!("indexer returned 503 for {}", address));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerGateway for MockLedger {
    async fn get_holders(&self, coin_address: &str) -> Result<Vec<HolderRecord>> {
        self.respond(coin_address).await?;
        Ok(self.holders.get(coin_address).cloned().unwrap_or_default())
    }

    async fn get_items(&self, collection_address: &str) -> Result<Vec<NftItemRecord>> {
        self.respond(collection_address).await?;
        Ok(self.items.get(collection_address).cloned().unwrap_or_default())
    }
}

fn holder(owner: u8, balance: u128) -> HolderRecord {
    HolderRecord {
        owner_address: raw(owner),
        balance,
    }
}

fn item(address: u8, owner: Option<u8>, sale_owner: Option<u8>) -> NftItemRecord {
    NftItemRecord {
        address: raw(address),
        owner: owner.map(raw),
        sale_owner: sale_owner.map(raw),
    }
}

fn pipeline(storage: &Arc<MockStorage>, ledger: MockLedger) -> ScreeningPipeline {
    ScreeningPipeline::new(
        storage.clone(),
        Arc::new(ledger),
        Arc::new(TonAddressCodec::default()),
        Arc::new(ThresholdTiers::new(vec![
            TierThreshold::new("member", 0.0),
            TierThreshold::new("silver", 10.0),
            TierThreshold::new("gold", 20.0),
        ])),
    )
}

fn wallet<'a>(wallets: &'a [WalletRecord], owner: u8) -> &'a WalletRecord {
    let address = persisted(owner);
    wallets
        .iter()
        .find(|wallet| wallet.address == address)
        .unwrap_or_else(|| panic!("wallet {} not persisted", address))
}

#[tokio::test]
async fn test_coin_scan_scales_raw_balance() {
    let coin = raw(100);
    let storage = Arc::new(MockStorage {
        coins: vec![CoinDefinition { address: coin.clone(), points_per_coin: 2.0 }],
        ..Default::default()
    });
    let mut ledger = MockLedger::default();
    ledger.holders.insert(coin.clone(), vec![holder(1, 5_000_000_000)]);

    let report = pipeline(&storage, ledger).screen().await.unwrap();

    let wallets = storage.last_wallets();
    assert_eq!(wallets.len(), 1);
    let a = wallet(&wallets, 1);
    assert_eq!(a.coin_holdings.len(), 1);
    assert_eq!(a.coin_holdings[0].coin_address, coin);
    assert_eq!(a.coin_holdings[0].balance, 5.0);
    assert_eq!(a.coin_points_total, 10.0);
    assert_eq!(a.nft_points_total, 0);
    assert_eq!(a.wallet_points_total, 10.0);
    assert_eq!(report.coins_scanned, 1);
    assert_eq!(report.holders_seen, 1);
    assert_eq!(report.wallets_persisted, 1);
}

#[tokio::test]
async fn test_collection_scan_credits_sale_owner() {
    let collection = raw(200);
    let storage = Arc::new(MockStorage {
        collections: vec![CollectionDefinition { address: collection.clone(), points_per_item: 3 }],
        ..Default::default()
    });
    let mut ledger = MockLedger::default();
    ledger.items.insert(
        collection.clone(),
        vec![
            item(10, Some(1), None),
            item(11, Some(1), None),
            item(12, Some(1), None),
            item(13, Some(1), Some(2)),
            item(14, None, None),
        ],
    );

    let report = pipeline(&storage, ledger).screen().await.unwrap();

    let wallets = storage.last_wallets();
    assert_eq!(wallets.len(), 2);
    let owner = wallet(&wallets, 1);
    assert_eq!(owner.nft_points_total, 9);
    assert_eq!(owner.nft_holdings[0].item_count(), 3);
    assert!(!owner.nft_holdings[0].item_addresses.contains(&raw(13)));

    let buyer = wallet(&wallets, 2);
    assert_eq!(buyer.nft_points_total, 3);
    assert_eq!(buyer.wallet_points_total, 3.0);
    assert!(buyer.nft_holdings[0].item_addresses.contains(&raw(13)));

    assert_eq!(report.items_seen, 5);
    assert_eq!(report.items_skipped, 1);
}

#[tokio::test]
async fn test_wallet_combines_coins_and_collections() {
    let coin = raw(100);
    let collection = raw(200);
    let storage = Arc::new(MockStorage {
        coins: vec![CoinDefinition { address: coin.clone(), points_per_coin: 1.5 }],
        collections: vec![CollectionDefinition { address: collection.clone(), points_per_item: 4 }],
        ..Default::default()
    });
    let mut ledger = MockLedger::default();
    ledger.holders.insert(coin, vec![holder(0xab, 2_000_000_000)]);
    // Same account spelled in upper case by the collection indexer
    let mut shouting = item(10, None, None);
    shouting.owner = Some(raw(0xab).to_uppercase());
    ledger.items.insert(collection, vec![shouting, item(11, Some(0xab), None)]);

    pipeline(&storage, ledger).screen().await.unwrap();

    let wallets = storage.last_wallets();
    assert_eq!(wallets.len(), 1);
    let a = wallet(&wallets, 0xab);
    assert_eq!(a.coin_points_total, 3.0);
    assert_eq!(a.nft_points_total, 8);
    assert_eq!(a.wallet_points_total, 11.0);
}

#[tokio::test]
async fn test_duplicate_holder_entries_are_summed() {
    let coin = raw(100);
    let storage = Arc::new(MockStorage {
        coins: vec![CoinDefinition { address: coin.clone(), points_per_coin: 1.0 }],
        ..Default::default()
    });
    let mut ledger = MockLedger::default();
    ledger.holders.insert(coin, vec![holder(1, 1_000_000_000), holder(1, 2_000_000_000)]);

    pipeline(&storage, ledger).screen().await.unwrap();

    let a = storage.last_wallets().remove(0);
    assert_eq!(a.coin_holdings.len(), 2);
    assert_eq!(a.coin_points_total, 3.0);
}

#[tokio::test]
async fn test_holdings_follow_definition_order() {
    let slow = raw(100);
    let fast = raw(101);
    let storage = Arc::new(MockStorage {
        coins: vec![
            CoinDefinition { address: slow.clone(), points_per_coin: 1.0 },
            CoinDefinition { address: fast.clone(), points_per_coin: 1.0 },
        ],
        ..Default::default()
    });
    let mut ledger = MockLedger::default();
    ledger.holders.insert(slow.clone(), vec![holder(1, 1_000_000_000)]);
    ledger.holders.insert(fast.clone(), vec![holder(1, 1_000_000_000)]);
    ledger.delays.insert(slow.clone(), 50);

    pipeline(&storage, ledger)
        .with_max_parallel_fetches(4)
        .screen()
        .await
        .unwrap();

    let a = storage.last_wallets().remove(0);
    let order: Vec<&str> = a.coin_holdings.iter().map(|h| h.coin_address.as_str()).collect();
    assert_eq!(order, vec![slow.as_str(), fast.as_str()]);
}

#[tokio::test]
async fn test_user_rollup_counts_absent_wallets_as_zero() {
    let collection = raw(200);
    let storage = Arc::new(MockStorage {
        collections: vec![CollectionDefinition { address: collection.clone(), points_per_item: 3 }],
        users: vec![
            UserRecord::new(7, vec![persisted(1), persisted(9)]),
            UserRecord::new(8, vec!["not-a-wallet".to_string()]),
            UserRecord::new(9, vec![]),
        ],
        ..Default::default()
    });
    let mut ledger = MockLedger::default();
    ledger.items.insert(
        collection,
        vec![item(10, Some(1), None), item(11, Some(1), None), item(12, Some(1), None)],
    );

    let report = pipeline(&storage, ledger).screen().await.unwrap();

    let users = storage.last_users();
    assert_eq!(users.len(), 3);
    assert_eq!(report.users_updated, 3);

    let linked = users.iter().find(|u| u.chat_id == 7).unwrap();
    assert_eq!(linked.points_total, 9.0);
    assert_eq!(linked.tier.as_deref(), Some("member"));
    assert_eq!(linked.wallets, vec![persisted(1), persisted(9)]);

    let unreadable = users.iter().find(|u| u.chat_id == 8).unwrap();
    assert_eq!(unreadable.points_total, 0.0);

    let empty = users.iter().find(|u| u.chat_id == 9).unwrap();
    assert_eq!(empty.points_total, 0.0);
    assert_eq!(empty.tier.as_deref(), Some("member"));
}

#[tokio::test]
async fn test_user_tier_follows_total() {
    let coin = raw(100);
    let storage = Arc::new(MockStorage {
        coins: vec![CoinDefinition { address: coin.clone(), points_per_coin: 10.0 }],
        users: vec![UserRecord::new(1, vec![persisted(1), persisted(2)])],
        ..Default::default()
    });
    let mut ledger = MockLedger::default();
    ledger.holders.insert(coin, vec![holder(1, 1_000_000_000), holder(2, 1_500_000_000)]);

    pipeline(&storage, ledger).screen().await.unwrap();

    let user = storage.last_users().remove(0);
    assert_eq!(user.points_total, 25.0);
    assert_eq!(user.tier.as_deref(), Some("gold"));
}

#[tokio::test]
async fn test_empty_inputs_still_write_batches() {
    let storage = Arc::new(MockStorage {
        users: vec![UserRecord {
            chat_id: 1,
            wallets: vec![persisted(1)],
            points_total: 42.0,
            tier: Some("gold".to_string()),
        }],
        ..Default::default()
    });

    let report = pipeline(&storage, MockLedger::default()).screen().await.unwrap();

    assert_eq!(storage.wallet_batches(), vec![Vec::<WalletRecord>::new()]);
    let user = storage.last_users().remove(0);
    assert_eq!(user.points_total, 0.0);
    assert_eq!(user.tier.as_deref(), Some("member"));
    assert_eq!(report.wallets_persisted, 0);
}

#[tokio::test]
async fn test_repeated_passes_are_idempotent() {
    let coin = raw(100);
    let collection = raw(200);
    let storage = Arc::new(MockStorage {
        coins: vec![CoinDefinition { address: coin.clone(), points_per_coin: 2.0 }],
        collections: vec![CollectionDefinition { address: collection.clone(), points_per_item: 3 }],
        users: vec![UserRecord::new(1, vec![persisted(1)])],
        ..Default::default()
    });
    let mut ledger = MockLedger::default();
    ledger.holders.insert(coin, vec![holder(1, 5_000_000_000), holder(2, 1)]);
    ledger.items.insert(collection, vec![item(10, Some(1), None), item(11, Some(2), Some(3))]);

    let pipeline = pipeline(&storage, ledger);
    pipeline.screen().await.unwrap();
    pipeline.screen().await.unwrap();

    let wallet_batches = storage.wallet_batches();
    assert_eq!(wallet_batches.len(), 2);
    assert_eq!(wallet_batches[0], wallet_batches[1]);

    let user_batches = storage.user_batches();
    assert_eq!(user_batches[0], user_batches[1]);
    assert_eq!(user_batches[1][0].points_total, 13.0);
}

#[tokio::test]
async fn test_ledger_failure_aborts_before_writes() {
    let good = raw(100);
    let bad = raw(101);
    let storage = Arc::new(MockStorage {
        coins: vec![
            CoinDefinition { address: good.clone(), points_per_coin: 1.0 },
            CoinDefinition { address: bad.clone(), points_per_coin: 1.0 },
        ],
        users: vec![UserRecord::new(1, vec![persisted(1)])],
        ..Default::default()
    });
    let mut ledger = MockLedger::default();
    ledger.holders.insert(good, vec![holder(1, 1_000_000_000)]);
    ledger.failing.insert(bad.clone());

    let result = pipeline(&storage, ledger).screen().await;

    match result {
        Err(ScreeningError::LedgerFetch { address, .. }) => assert_eq!(address, bad),
        other => panic!("expected ledger failure, got {:?}", other.map(|r| r.wallets_persisted)),
    }
    assert!(storage.wallet_batches().is_empty());
    assert!(storage.user_batches().is_empty());
}

#[tokio::test]
async fn test_invalid_holder_address_aborts_pass() {
    let coin = raw(100);
    let storage = Arc::new(MockStorage {
        coins: vec![CoinDefinition { address: coin.clone(), points_per_coin: 1.0 }],
        ..Default::default()
    });
    let mut ledger = MockLedger::default();
    ledger.holders.insert(
        coin,
        vec![HolderRecord { owner_address: "garbage".to_string(), balance: 1 }],
    );

    let result = pipeline(&storage, ledger).screen().await;

    assert!(matches!(result, Err(ScreeningError::AddressConversion(_))));
    assert!(storage.wallet_batches().is_empty());
}

#[tokio::test]
async fn test_pass_invalidates_cached_users() {
    let storage = Arc::new(MockStorage {
        users: vec![UserRecord::new(5, vec![persisted(1)])],
        ..Default::default()
    });
    let cache = UserCache::new(100, 600);
    let cached = cache.get_or_load(5, storage.as_ref()).await.unwrap();
    assert!(cached.is_some());
    assert!(cache.get(5).await.is_some());

    pipeline(&storage, MockLedger::default())
        .with_user_cache(cache.clone())
        .screen()
        .await
        .unwrap();

    assert!(cache.get(5).await.is_none());
}

#[tokio::test]
async fn test_builder_cache_is_cleared_by_pass() {
    let storage = Arc::new(MockStorage {
        users: vec![UserRecord::new(5, vec![persisted(1)])],
        ..Default::default()
    });
    let pipeline = ScreenerBuilder::new()
        .with_user_cache(100, 600)
        .build(storage.clone(), Arc::new(MockLedger::default()));

    let cache = pipeline.user_cache().expect("builder wires a user cache");
    assert!(cache.get_or_load(5, storage.as_ref()).await.unwrap().is_some());
    assert!(cache.get(5).await.is_some());

    pipeline.screen().await.unwrap();

    assert!(cache.get(5).await.is_none());
}

#[tokio::test]
async fn test_failed_wallet_write_skips_users() {
    let coin = raw(100);
    let storage = Arc::new(MockStorage {
        coins: vec![CoinDefinition { address: coin.clone(), points_per_coin: 1.0 }],
        users: vec![UserRecord::new(1, vec![persisted(1)])],
        fail_wallet_write: true,
        ..Default::default()
    });
    let mut ledger = MockLedger::default();
    ledger.holders.insert(coin, vec![holder(1, 1_000_000_000)]);

    let result = pipeline(&storage, ledger).screen().await;

    assert!(matches!(
        result,
        Err(ScreeningError::Persistence { operation: "update_wallets", .. })
    ));
    assert!(storage.user_batches().is_empty());
}

#[tokio::test]
async fn test_failed_user_write_keeps_cached_users() {
    let storage = Arc::new(MockStorage {
        users: vec![UserRecord::new(5, vec![persisted(1)])],
        fail_user_write: true,
        ..Default::default()
    });
    let cache = UserCache::new(100, 600);
    cache.get_or_load(5, storage.as_ref()).await.unwrap();

    let result = pipeline(&storage, MockLedger::default())
        .with_user_cache(cache.clone())
        .screen()
        .await;

    assert!(matches!(
        result,
        Err(ScreeningError::Persistence { operation: "update_users", .. })
    ));
    assert_eq!(storage.wallet_batches().len(), 1);
    assert!(cache.get(5).await.is_some());
}

#[tokio::test]
async fn test_oversized_parallelism_is_clamped() {
    let coin = raw(100);
    let storage = Arc::new(MockStorage {
        coins: vec![CoinDefinition { address: coin.clone(), points_per_coin: 1.0 }],
        ..Default::default()
    });
    let mut ledger = MockLedger::default();
    ledger.holders.insert(coin, vec![holder(1, 1_000_000_000)]);

    pipeline(&storage, ledger)
        .with_max_parallel_fetches(usize::MAX)
        .screen()
        .await
        .unwrap();

    assert_eq!(storage.last_wallets().len(), 1);
}
