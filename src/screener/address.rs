//! Conversion between raw ledger addresses and user-friendly stored addresses.
//!
//! The indexer reports accounts as `workchain:hex`. Wallets and users are stored
//! in the 48-character base64 form shown by wallets: a tag byte, the workchain
//! byte, the 32-byte account hash and a CRC16-XMODEM checksum.

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;

use crate::screener::error::AddressError;
use crate::types::{LedgerAddress, PersistedAddress};

const TAG_BOUNCEABLE: u8 = 0x11;
const TAG_NON_BOUNCEABLE: u8 = 0x51;
const TAG_TESTNET: u8 = 0x80;
const FRIENDLY_LEN: usize = 36;

/// Converts addresses between the ledger encoding and the persisted encoding.
/// `to_persisted` and `to_ledger` must be exact inverses on normalized input.
pub trait AddressCodec: Send + Sync {
    fn to_persisted(&self, ledger: &str) -> Result<PersistedAddress, AddressError>;

    fn to_ledger(&self, persisted: &str) -> Result<LedgerAddress, AddressError>;

    /// Canonical spelling of a ledger address, used as the accumulator key.
    fn normalize(&self, ledger: &str) -> Result<LedgerAddress, AddressError> {
        let persisted = self.to_persisted(ledger)?;
        self.to_ledger(&persisted)
    }
}

/// TON address codec.
#[derive(Debug, Clone, Copy)]
pub struct TonAddressCodec {
    bounceable: bool,
    testnet: bool,
}

impl TonAddressCodec {
    pub fn new(bounceable: bool, testnet: bool) -> Self {
        Self {
            bounceable,
            testnet,
        }
    }

    fn tag(&self) -> u8 {
        let base = if self.bounceable {
            TAG_BOUNCEABLE
        } else {
            TAG_NON_BOUNCEABLE
        };
        if self.testnet {
            base | TAG_TESTNET
        } else {
            base
        }
    }

    fn parse_raw(ledger: &str) -> Result<(i8, [u8; 32]), AddressError> {
        let (wc, hash_hex) = ledger
            .trim()
            .split_once(':')
            .ok_or_else(|| AddressError::InvalidRawFormat(ledger.to_string()))?;

        let workchain: i8 = wc
            .parse()
            .map_err(|_| AddressError::InvalidWorkchain(ledger.to_string()))?;

        let mut hash = [0u8; 32];
        hex::decode_to_slice(hash_hex, &mut hash)
            .map_err(|_| AddressError::InvalidHash(ledger.to_string()))?;

        Ok((workchain, hash))
    }

    fn format_raw(workchain: i8, hash: &[u8]) -> LedgerAddress {
        format!("{}:{}", workchain, hex::encode(hash))
    }
}

impl Default for TonAddressCodec {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl AddressCodec for TonAddressCodec {
    fn to_persisted(&self, ledger: &str) -> Result<PersistedAddress, AddressError> {
        let (workchain, hash) = Self::parse_raw(ledger)?;

        let mut bytes = Vec::with_capacity(FRIENDLY_LEN);
        bytes.push(self.tag());
        bytes.push(workchain as u8);
        bytes.extend_from_slice(&hash);
        let crc = crc16_xmodem(&bytes);
        bytes.extend_from_slice(&crc.to_be_bytes());

        Ok(URL_SAFE.encode(bytes))
    }

    fn to_ledger(&self, persisted: &str) -> Result<LedgerAddress, AddressError> {
        let trimmed = persisted.trim();
        // Both alphabets are in circulation
        let standard: String = trimmed
            .chars()
            .map(|c| match c {
                '-' => '+',
                '_' => '/',
                other => other,
            })
            .collect();
        let bytes = STANDARD
            .decode(standard)
            .map_err(|_| AddressError::InvalidBase64(persisted.to_string()))?;

        if bytes.len() != FRIENDLY_LEN {
            return Err(AddressError::InvalidLength {
                address: persisted.to_string(),
                len: bytes.len(),
            });
        }

        let tag = bytes[0] & !TAG_TESTNET;
        if tag != TAG_BOUNCEABLE && tag != TAG_NON_BOUNCEABLE {
            return Err(AddressError::InvalidTag {
                address: persisted.to_string(),
                tag: bytes[0],
            });
        }

        let expected = crc16_xmodem(&bytes[..34]);
        if expected.to_be_bytes() != bytes[34..36] {
            return Err(AddressError::ChecksumMismatch(persisted.to_string()));
        }

        Ok(Self::format_raw(bytes[1] as i8, &bytes[2..34]))
    }

    fn normalize(&self, ledger: &str) -> Result<LedgerAddress, AddressError> {
        let (workchain, hash) = Self::parse_raw(ledger)?;
        Ok(Self::format_raw(workchain, &hash))
    }
}

fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}
