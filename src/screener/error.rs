//! Error types for screening passes

use thiserror::Error;

use crate::types::LedgerAddress;

/// Any of these aborts the pass in progress. Nothing is written after the first error.
#[derive(Error, Debug)]
pub enum ScreeningError {
    #[error("Ledger fetch failed for {address}: {source:#}")]
    LedgerFetch {
        address: LedgerAddress,
        #[source]
        source: anyhow::Error,
    },

    #[error("Persistence operation {operation} failed: {source:#}")]
    Persistence {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("Address conversion failed: {0}")]
    AddressConversion(#[from] AddressError),

    #[error("Wallet totals read before finalize")]
    NotFinalized,

    #[error("Ledger fetch task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ScreeningError {
    pub(crate) fn persistence(operation: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| ScreeningError::Persistence { operation, source }
    }
}

/// Malformed address in either encoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Raw address {0} is not in workchain:hex form")]
    InvalidRawFormat(String),

    #[error("Invalid workchain in {0}")]
    InvalidWorkchain(String),

    #[error("Invalid account hash in {0}")]
    InvalidHash(String),

    #[error("Address {0} is not valid base64")]
    InvalidBase64(String),

    #[error("Address {address} decodes to {len} bytes, expected 36")]
    InvalidLength { address: String, len: usize },

    #[error("Unknown address tag 0x{tag:02x} in {address}")]
    InvalidTag { address: String, tag: u8 },

    #[error("Checksum mismatch in {0}")]
    ChecksumMismatch(String),
}

/// Result type alias for screening operations
pub type ScreeningResult<T> = Result<T, ScreeningError>;
