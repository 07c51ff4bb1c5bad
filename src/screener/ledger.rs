//! Ledger data sources for holder and NFT ownership snapshots.
//!
//! This module hides pagination, rate limiting and retries behind the
//! [`LedgerGateway`] trait. The pipeline only ever sees complete result sets.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;
use tokio_retry::{strategy::ExponentialBackoff, Retry};
use tracing::{debug, instrument, warn};

use crate::screener::types::ScreenerConfig;
use crate::types::{HolderRecord, NftItemRecord};

/// Largest page tonapi serves; larger requests come back short.
const TONAPI_MAX_PAGE_LIMIT: usize = 1000;

/// Read-only access to current ledger state.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Every current holder of the token.
    async fn get_holders(&self, token_address: &str) -> Result<Vec<HolderRecord>>;

    /// Every current item of the collection.
    async fn get_items(&self, collection_address: &str) -> Result<Vec<NftItemRecord>>;
}

#[derive(Debug, Deserialize)]
struct AccountRef {
    address: String,
}

#[derive(Debug, Deserialize)]
struct JettonHolder {
    owner: AccountRef,
    balance: String,
}

#[derive(Debug, Deserialize)]
struct JettonHoldersPage {
    #[serde(default)]
    addresses: Vec<JettonHolder>,
}

#[derive(Debug, Deserialize)]
struct NftSale {
    owner: Option<AccountRef>,
}

#[derive(Debug, Deserialize)]
struct NftItem {
    address: String,
    owner: Option<AccountRef>,
    sale: Option<NftSale>,
}

#[derive(Debug, Deserialize)]
struct NftItemsPage {
    #[serde(default)]
    nft_items: Vec<NftItem>,
}

impl TryFrom<JettonHolder> for HolderRecord {
    type Error = anyhow::Error;

    fn try_from(holder: JettonHolder) -> Result<Self> {
        let balance = holder
            .balance
            .parse()
            .with_context(|| format!("Invalid balance '{}' for {}", holder.balance, holder.owner.address))?;
        Ok(HolderRecord {
            owner_address: holder.owner.address,
            balance,
        })
    }
}

impl From<NftItem> for NftItemRecord {
    fn from(item: NftItem) -> Self {
        NftItemRecord {
            address: item.address,
            owner: item.owner.map(|owner| owner.address),
            sale_owner: item.sale.and_then(|sale| sale.owner).map(|owner| owner.address),
        }
    }
}

/// tonapi.io backed ledger gateway.
pub struct TonApiLedger {
    http_client: Client,
    base_url: String,
    api_key: Option<String>,
    page_limit: usize,
    retry_attempts: usize,
    limiter: DefaultDirectRateLimiter,
}

impl TonApiLedger {
    pub fn new(config: &ScreenerConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.rate_limit_requests_per_second).unwrap_or(NonZeroU32::MIN),
        );

        Ok(Self {
            http_client,
            base_url: config.tonapi_base_url.trim_end_matches('/').to_string(),
            api_key: config.tonapi_key.clone(),
            page_limit: config.page_limit.clamp(1, TONAPI_MAX_PAGE_LIMIT),
            retry_attempts: config.retry_attempts,
            limiter: RateLimiter::direct(quota),
        })
    }

    /// Fetch one page, waiting for the rate limiter and retrying with backoff.
    async fn fetch_page_with_retries<T: DeserializeOwned>(
        &self,
        path: &str,
        offset: usize,
    ) -> Result<T> {
        let retry_strategy = ExponentialBackoff::from_millis(100)
            .max_delay(Duration::from_secs(5))
            .take(self.retry_attempts);

        Retry::spawn(retry_strategy, || self.fetch_page(path, offset)).await
    }

    #[instrument(skip(self))]
    async fn fetch_page<T: DeserializeOwned>(&self, path: &str, offset: usize) -> Result<T> {
        self.limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .http_client
            .get(&url)
            .query(&[("limit", self.page_limit), ("offset", offset)]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        if !response.status().is_success() {
            warn!("Ledger API returned {} for {}", response.status(), url);
            return Err(anyhow!("Ledger API returned {} for {}", response.status(), url));
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }

    /// Walk offsets until a short page is returned.
    async fn fetch_all<P, T>(&self, path: &str, extract: impl Fn(P) -> Vec<T>) -> Result<Vec<T>>
    where
        P: DeserializeOwned,
    {
        let mut results = Vec::new();
        let mut offset = 0;

        loop {
            let page: P = self.fetch_page_with_retries(path, offset).await?;
            let entries = extract(page);
            let count = entries.len();
            results.extend(entries);

            if count < self.page_limit {
                break;
            }
            offset += count;
        }

        Ok(results)
    }
}

#[async_trait]
impl LedgerGateway for TonApiLedger {
    #[instrument(skip(self, token_address), fields(token = %token_address))]
    async fn get_holders(&self, token_address: &str) -> Result<Vec<HolderRecord>> {
        let path = format!("/v2/jettons/{}/holders", token_address);
        let holders = self
            .fetch_all(&path, |page: JettonHoldersPage| page.addresses)
            .await?;

        let records = holders
            .into_iter()
            .map(HolderRecord::try_from)
            .collect::<Result<Vec<_>>>()?;

        debug!("Fetched {} holders", records.len());
        Ok(records)
    }

    #[instrument(skip(self, collection_address), fields(collection = %collection_address))]
    async fn get_items(&self, collection_address: &str) -> Result<Vec<NftItemRecord>> {
        let path = format!("/v2/nfts/collections/{}/items", collection_address);
        let items = self
            .fetch_all(&path, |page: NftItemsPage| page.nft_items)
            .await?;

        debug!("Fetched {} items", items.len());
        Ok(items.into_iter().map(NftItemRecord::from).collect())
    }
}
