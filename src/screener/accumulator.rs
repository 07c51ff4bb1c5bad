//! Pass-local wallet accumulator.
//!
//! Coin and collection scans push holdings into buckets keyed by the normalized
//! ledger address. Once every scan has completed the pipeline finalizes the
//! totals and drains the buckets into a read-only [`WalletSnapshot`].

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::screener::address::AddressCodec;
use crate::screener::error::{ScreeningError, ScreeningResult};
use crate::screener::types::{CoinHolding, NftCollectionHolding, WalletRecord};
use crate::types::LedgerAddress;

pub struct WalletAccumulator {
    codec: Arc<dyn AddressCodec>,
    wallets: HashMap<LedgerAddress, WalletRecord>,
    finalized: bool,
}

impl WalletAccumulator {
    pub fn new(codec: Arc<dyn AddressCodec>) -> Self {
        Self {
            codec,
            wallets: HashMap::new(),
            finalized: false,
        }
    }

    /// Append a coin holding to the wallet at `address`, creating the wallet if needed.
    /// Holdings are never deduplicated.
    pub fn add_coin_contribution(
        &mut self,
        address: &str,
        holding: CoinHolding,
    ) -> ScreeningResult<()> {
        self.wallet_entry(address)?.coin_holdings.push(holding);
        Ok(())
    }

    /// Append a collection holding to the wallet at `address`, creating the wallet if needed.
    pub fn add_nft_contribution(
        &mut self,
        address: &str,
        holding: NftCollectionHolding,
    ) -> ScreeningResult<()> {
        self.wallet_entry(address)?.nft_holdings.push(holding);
        Ok(())
    }

    fn wallet_entry(&mut self, address: &str) -> ScreeningResult<&mut WalletRecord> {
        let key = self.codec.normalize(address)?;
        // Any new contribution makes earlier totals stale
        self.finalized = false;

        match self.wallets.entry(key) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let persisted = self.codec.to_persisted(entry.key())?;
                debug!("New wallet {} ({})", persisted, entry.key());
                Ok(entry.insert(WalletRecord::new(persisted)))
            }
        }
    }

    /// Compute coin, NFT and wallet totals for every wallet.
    pub fn finalize(&mut self) -> usize {
        for wallet in self.wallets.values_mut() {
            wallet.compute_totals();
        }
        self.finalized = true;
        self.wallets.len()
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    /// Hand out all finalized wallets and reset the accumulator.
    pub fn drain(&mut self) -> ScreeningResult<WalletSnapshot> {
        if !self.finalized {
            return Err(ScreeningError::NotFinalized);
        }
        self.finalized = false;
        Ok(WalletSnapshot {
            wallets: std::mem::take(&mut self.wallets),
        })
    }
}

/// Finalized wallets of one pass, keyed by normalized ledger address.
#[derive(Debug, Default, Clone)]
pub struct WalletSnapshot {
    wallets: HashMap<LedgerAddress, WalletRecord>,
}

impl WalletSnapshot {
    pub fn get(&self, ledger_address: &str) -> Option<&WalletRecord> {
        self.wallets.get(ledger_address)
    }

    /// Wallet total for `ledger_address`, or 0 when the wallet had no activity this pass.
    pub fn points_for(&self, ledger_address: &str) -> f64 {
        self.get(ledger_address)
            .map(|wallet| wallet.wallet_points_total)
            .unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    /// Records ordered by persisted address, ready for a bulk write.
    pub fn records(&self) -> Vec<WalletRecord> {
        let mut records: Vec<WalletRecord> = self.wallets.values().cloned().collect();
        records.sort_by(|a, b| a.address.cmp(&b.address));
        records
    }
}
