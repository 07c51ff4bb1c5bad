//! Core types shared by the screener and its collaborators.

use serde::{Deserialize, Serialize};

/// Address in the ledger's raw form (`workchain:hex`), as returned by the indexer API
pub type LedgerAddress = String;

/// Address in the user-friendly form stored on wallet and user records
pub type PersistedAddress = String;

/// Unscaled on-chain token amount (jetton balances can exceed u64)
pub type RawAmount = u128;

/// Telegram chat identifier that owns a user record
pub type ChatId = i64;

/// A fungible token whose holders earn points proportional to balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinDefinition {
    /// Jetton master address (ledger form)
    pub address: LedgerAddress,
    /// Points granted per whole coin held
    pub points_per_coin: f64,
}

/// An NFT collection whose owners earn points per item held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionDefinition {
    /// Collection address (ledger form)
    pub address: LedgerAddress,
    /// Points granted per item owned
    pub points_per_item: u64,
}

/// One holder of one coin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HolderRecord {
    pub owner_address: LedgerAddress,
    pub balance: RawAmount,
}

/// One item of an NFT collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NftItemRecord {
    /// Item address (ledger form)
    pub address: LedgerAddress,
    /// Current direct owner, if the indexer reports one
    pub owner: Option<LedgerAddress>,
    /// Owner recorded on the sale contract when the item is listed
    pub sale_owner: Option<LedgerAddress>,
}

impl NftItemRecord {
    /// The address that earns points for this item: the seller when the item is
    /// listed, otherwise the direct owner.
    pub fn effective_owner(&self) -> Option<&LedgerAddress> {
        self.sale_owner.as_ref().or(self.owner.as_ref())
    }
}
