//! Screener configuration from environment variables

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

use crate::screener::tiers::parse_tiers;
use crate::screener::types::ScreenerConfig;

fn parse_var<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl ScreenerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `SCREENER_DATABASE_URL` (default: sqlite:./screener.db?mode=rwc)
    /// - `TONAPI_BASE_URL` (default: https://tonapi.io)
    /// - `TONAPI_KEY` (default: none)
    /// - `SCREENER_LEDGER_DECIMALS` (default: 9)
    /// - `TONAPI_PAGE_LIMIT` (default: 1000)
    /// - `TONAPI_RATE_LIMIT` (default: 1)
    /// - `TONAPI_RETRY_ATTEMPTS` (default: 3)
    /// - `TONAPI_TIMEOUT_SECS` (default: 30)
    /// - `SCREENER_MAX_PARALLEL_FETCHES` (default: 4)
    /// - `SCREENER_INTERVAL_SECS` (default: 3600)
    /// - `SCREENER_TIERS` as `label:min,...` (default: none/bronze/silver/gold/platinum)
    /// - `SCREENER_BOUNCEABLE` (default: true)
    /// - `SCREENER_TESTNET` (default: false)
    /// - `SCREENER_USER_CACHE_CAPACITY` (default: 10000)
    /// - `SCREENER_USER_CACHE_TTL_SECS` (default: 300)
    ///
    /// Only a malformed tier table is an error; other unparsable values use the default.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let tiers = match env::var("SCREENER_TIERS") {
            Ok(table) if !table.trim().is_empty() => {
                parse_tiers(&table).context("Invalid SCREENER_TIERS")?
            }
            _ => defaults.tiers,
        };

        Ok(Self {
            database_url: env::var("SCREENER_DATABASE_URL").unwrap_or(defaults.database_url),
            tonapi_base_url: env::var("TONAPI_BASE_URL").unwrap_or(defaults.tonapi_base_url),
            tonapi_key: env::var("TONAPI_KEY").ok().filter(|key| !key.is_empty()),
            ledger_decimals: parse_var("SCREENER_LEDGER_DECIMALS", defaults.ledger_decimals),
            page_limit: parse_var("TONAPI_PAGE_LIMIT", defaults.page_limit),
            rate_limit_requests_per_second: parse_var(
                "TONAPI_RATE_LIMIT",
                defaults.rate_limit_requests_per_second,
            ),
            retry_attempts: parse_var("TONAPI_RETRY_ATTEMPTS", defaults.retry_attempts),
            request_timeout_seconds: parse_var(
                "TONAPI_TIMEOUT_SECS",
                defaults.request_timeout_seconds,
            ),
            max_parallel_fetches: parse_var(
                "SCREENER_MAX_PARALLEL_FETCHES",
                defaults.max_parallel_fetches,
            ),
            screen_interval_seconds: parse_var(
                "SCREENER_INTERVAL_SECS",
                defaults.screen_interval_seconds,
            ),
            tiers,
            bounceable: parse_var("SCREENER_BOUNCEABLE", defaults.bounceable),
            testnet: parse_var("SCREENER_TESTNET", defaults.testnet),
            user_cache_capacity: parse_var(
                "SCREENER_USER_CACHE_CAPACITY",
                defaults.user_cache_capacity,
            ),
            user_cache_ttl_seconds: parse_var(
                "SCREENER_USER_CACHE_TTL_SECS",
                defaults.user_cache_ttl_seconds,
            ),
        })
    }
}
