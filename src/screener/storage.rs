//! Storage abstraction layer for the screener
//!
//! This module defines the persistence contract the pipeline reads its inputs
//! from and writes its results to, plus the SQLite implementation used by the
//! service.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, FromRow, Pool, Sqlite};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::screener::types::{CoinHolding, NftCollectionHolding, UserRecord, WalletRecord};
use crate::types::{ChatId, CoinDefinition, CollectionDefinition};

/// Formal contract for screener persistence.
/// Reads are snapshots taken at pass start; bulk writes are all-or-nothing.
#[async_trait]
pub trait ScreeningStorage: Send + Sync {
    /// Coins currently earning points.
    async fn find_active_coins(&self) -> Result<Vec<CoinDefinition>>;

    /// Collections currently earning points.
    async fn find_active_collections(&self) -> Result<Vec<CollectionDefinition>>;

    async fn find_all_users(&self) -> Result<Vec<UserRecord>>;

    async fn find_user(&self, chat_id: ChatId) -> Result<Option<UserRecord>>;

    /// Upserts every wallet in one transaction.
    async fn update_wallets(&self, wallets: &[WalletRecord]) -> Result<()>;

    /// Writes the totals and tier of every user in one transaction.
    async fn update_users(&self, users: &[UserRecord]) -> Result<()>;

    /// Health check for the storage backend.
    async fn health_check(&self) -> Result<bool>;
}

#[derive(FromRow)]
struct CoinRow {
    address: String,
    points_per_coin: f64,
}

#[derive(FromRow)]
struct CollectionRow {
    address: String,
    points_per_item: i64,
}

#[derive(FromRow)]
struct UserRow {
    chat_id: i64,
    wallets: String, // JSON
    points_total: f64,
    tier: Option<String>,
}

#[derive(FromRow)]
struct WalletRow {
    address: String,
    coin_holdings: String, // JSON
    nft_holdings: String,  // JSON
    coin_points_total: f64,
    nft_points_total: i64,
    wallet_points_total: f64,
}

/// SQLite implementation of the ScreeningStorage trait.
pub struct SqliteScreeningStorage {
    pool: Pool<Sqlite>,
}

impl SqliteScreeningStorage {
    /// Connects to `database_url` and creates the schema if it is missing.
    pub async fn new(database_url: &str) -> Result<Arc<Self>> {
        let in_memory = database_url.contains(":memory:");
        let mut options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
        if in_memory {
            // Every connection to :memory: is a separate database
            options = options
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>);
        }

        let pool = options
            .connect(database_url)
            .await
            .context("Failed to connect to SQLite database")?;

        Self::create_schema(&pool).await?;

        info!("SqliteScreeningStorage initialized and connected to {}", database_url);

        Ok(Arc::new(Self { pool }))
    }

    async fn create_schema(pool: &Pool<Sqlite>) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS coins (
                address TEXT PRIMARY KEY,
                points_per_coin REAL NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE
            );
            "#
        )
        .execute(pool)
        .await
        .context("Failed to create coins table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                address TEXT PRIMARY KEY,
                points_per_item INTEGER NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE
            );
            "#
        )
        .execute(pool)
        .await
        .context("Failed to create collections table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                chat_id INTEGER PRIMARY KEY,
                wallets TEXT NOT NULL,
                points_total REAL NOT NULL DEFAULT 0,
                tier TEXT
            );
            "#
        )
        .execute(pool)
        .await
        .context("Failed to create users table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wallets (
                address TEXT PRIMARY KEY,
                coin_holdings TEXT NOT NULL,
                nft_holdings TEXT NOT NULL,
                coin_points_total REAL NOT NULL,
                nft_points_total INTEGER NOT NULL,
                wallet_points_total REAL NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#
        )
        .execute(pool)
        .await
        .context("Failed to create wallets table")?;

        Ok(())
    }

    pub async fn upsert_coin(&self, coin: &CoinDefinition, is_active: bool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO coins (address, points_per_coin, is_active) VALUES (?, ?, ?)
            ON CONFLICT(address) DO UPDATE SET
                points_per_coin = excluded.points_per_coin,
                is_active = excluded.is_active
            "#
        )
        .bind(&coin.address)
        .bind(coin.points_per_coin)
        .bind(is_active)
        .execute(&self.pool)
        .await
        .context(format!("Failed to upsert coin {}", coin.address))?;
        Ok(())
    }

    pub async fn upsert_collection(
        &self,
        collection: &CollectionDefinition,
        is_active: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO collections (address, points_per_item, is_active) VALUES (?, ?, ?)
            ON CONFLICT(address) DO UPDATE SET
                points_per_item = excluded.points_per_item,
                is_active = excluded.is_active
            "#
        )
        .bind(&collection.address)
        .bind(collection.points_per_item as i64)
        .bind(is_active)
        .execute(&self.pool)
        .await
        .context(format!("Failed to upsert collection {}", collection.address))?;
        Ok(())
    }

    /// Creates or replaces a user including its wallet list.
    pub async fn upsert_user(&self, user: &UserRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (chat_id, wallets, points_total, tier) VALUES (?, ?, ?, ?)
            ON CONFLICT(chat_id) DO UPDATE SET
                wallets = excluded.wallets,
                points_total = excluded.points_total,
                tier = excluded.tier
            "#
        )
        .bind(user.chat_id)
        .bind(serde_json::to_string(&user.wallets)?)
        .bind(user.points_total)
        .bind(&user.tier)
        .execute(&self.pool)
        .await
        .context(format!("Failed to upsert user {}", user.chat_id))?;
        Ok(())
    }

    pub async fn get_wallet(&self, address: &str) -> Result<Option<WalletRecord>> {
        let row: Option<WalletRow> = sqlx::query_as(
            r#"
            SELECT address, coin_holdings, nft_holdings, coin_points_total,
                   nft_points_total, wallet_points_total
            FROM wallets WHERE address = ?
            "#
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch wallet by address")?;

        row.map(Self::row_to_wallet).transpose()
    }

    pub async fn get_wallet_count(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM wallets")
            .fetch_one(&self.pool)
            .await
            .context("Failed to get wallet count")?;

        Ok(count.0)
    }

    fn row_to_user(row: UserRow) -> Result<UserRecord> {
        Ok(UserRecord {
            chat_id: row.chat_id,
            wallets: serde_json::from_str(&row.wallets)
                .context(format!("Corrupt wallet list for user {}", row.chat_id))?,
            points_total: row.points_total,
            tier: row.tier,
        })
    }

    fn row_to_wallet(row: WalletRow) -> Result<WalletRecord> {
        let coin_holdings: Vec<CoinHolding> = serde_json::from_str(&row.coin_holdings)
            .context(format!("Corrupt coin holdings for wallet {}", row.address))?;
        let nft_holdings: Vec<NftCollectionHolding> = serde_json::from_str(&row.nft_holdings)
            .context(format!("Corrupt NFT holdings for wallet {}", row.address))?;

        Ok(WalletRecord {
            address: row.address,
            coin_holdings,
            nft_holdings,
            coin_points_total: row.coin_points_total,
            nft_points_total: row.nft_points_total as u64,
            wallet_points_total: row.wallet_points_total,
        })
    }
}

#[async_trait]
impl ScreeningStorage for SqliteScreeningStorage {
    async fn find_active_coins(&self) -> Result<Vec<CoinDefinition>> {
        let rows: Vec<CoinRow> = sqlx::query_as(
            "SELECT address, points_per_coin FROM coins WHERE is_active = TRUE ORDER BY address"
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch active coins")?;

        Ok(rows
            .into_iter()
            .map(|row| CoinDefinition {
                address: row.address,
                points_per_coin: row.points_per_coin,
            })
            .collect())
    }

    async fn find_active_collections(&self) -> Result<Vec<CollectionDefinition>> {
        let rows: Vec<CollectionRow> = sqlx::query_as(
            "SELECT address, points_per_item FROM collections WHERE is_active = TRUE ORDER BY address"
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch active collections")?;

        Ok(rows
            .into_iter()
            .map(|row| CollectionDefinition {
                address: row.address,
                points_per_item: row.points_per_item.max(0) as u64,
            })
            .collect())
    }

    async fn find_all_users(&self) -> Result<Vec<UserRecord>> {
        let rows: Vec<UserRow> = sqlx::query_as(
            "SELECT chat_id, wallets, points_total, tier FROM users ORDER BY chat_id"
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch users")?;

        rows.into_iter().map(Self::row_to_user).collect()
    }

    async fn find_user(&self, chat_id: ChatId) -> Result<Option<UserRecord>> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT chat_id, wallets, points_total, tier FROM users WHERE chat_id = ?"
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user by chat id")?;

        row.map(Self::row_to_user).transpose()
    }

    async fn update_wallets(&self, wallets: &[WalletRecord]) -> Result<()> {
        debug!("Upserting {} wallets", wallets.len());

        let updated_at = chrono::Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        for wallet in wallets {
            sqlx::query(
                r#"
                INSERT INTO wallets (
                    address, coin_holdings, nft_holdings, coin_points_total,
                    nft_points_total, wallet_points_total, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(address) DO UPDATE SET
                    coin_holdings = excluded.coin_holdings,
                    nft_holdings = excluded.nft_holdings,
                    coin_points_total = excluded.coin_points_total,
                    nft_points_total = excluded.nft_points_total,
                    wallet_points_total = excluded.wallet_points_total,
                    updated_at = excluded.updated_at
                "#
            )
            .bind(&wallet.address)
            .bind(serde_json::to_string(&wallet.coin_holdings)?)
            .bind(serde_json::to_string(&wallet.nft_holdings)?)
            .bind(wallet.coin_points_total)
            .bind(wallet.nft_points_total as i64)
            .bind(wallet.wallet_points_total)
            .bind(updated_at)
            .execute(&mut *tx)
            .await
            .context(format!("Failed to upsert wallet {}", wallet.address))?;
        }

        tx.commit().await.context("Failed to commit wallet batch")?;
        Ok(())
    }

    async fn update_users(&self, users: &[UserRecord]) -> Result<()> {
        debug!("Upserting {} users", users.len());

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        // Wallet lists are left alone: users may link wallets while a pass runs
        for user in users {
            sqlx::query(
                r#"
                INSERT INTO users (chat_id, wallets, points_total, tier) VALUES (?, ?, ?, ?)
                ON CONFLICT(chat_id) DO UPDATE SET
                    points_total = excluded.points_total,
                    tier = excluded.tier
                "#
            )
            .bind(user.chat_id)
            .bind(serde_json::to_string(&user.wallets)?)
            .bind(user.points_total)
            .bind(&user.tier)
            .execute(&mut *tx)
            .await
            .context(format!("Failed to upsert user {}", user.chat_id))?;
        }

        tx.commit().await.context("Failed to commit user batch")?;
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}
