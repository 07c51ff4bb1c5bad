//! loyalty-screener - periodic loyalty point screening for TON holders
//!
//! This crate recomputes loyalty points from on-chain holdings: jetton
//! balances and NFT ownership are weighted per coin and collection,
//! aggregated per wallet and rolled up into user totals and tiers.

pub mod types;
pub mod screener;

// Re-export main types for convenience
pub use types::{CoinDefinition, CollectionDefinition, HolderRecord, NftItemRecord};
pub use screener::{ScreenerBuilder, ScreeningPipeline, ScreeningScheduler};
