//! Reference exchange rates for presenting USD amounts in other currencies.
//!
//! Billing never depends on this module: every upstream failure ends in a
//! configured fallback rate, and only a pair with no data and no fallback is
//! an error.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub mod nbp;
pub mod provider;

pub use nbp::NbpRateSource;
pub use provider::ExchangeRateProvider;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRateConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// NBP table; `c` carries bid/ask rates
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Upper bound for a whole lookup including look-back requests
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    /// Local publication time of a new table, `HH:MM` in the billing-day zone
    #[serde(default = "default_publication_time")]
    pub publication_time: String,
    #[serde(default = "default_lookback_ttl_secs")]
    pub lookback_ttl_secs: u64,
    #[serde(default = "default_fallback_ttl_secs")]
    pub fallback_ttl_secs: u64,
    #[serde(default = "default_min_ttl_secs")]
    pub min_ttl_secs: u64,
    /// Rates used when the source is unavailable, keyed `usd_pln`
    #[serde(default = "default_fallback_rates")]
    pub fallback_rates: HashMap<String, String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_base_url() -> String {
    "https://api.nbp.pl/api".to_string()
}

fn default_table() -> String {
    "c".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_lookback_days() -> u32 {
    7
}

fn default_publication_time() -> String {
    "08:15".to_string()
}

fn default_lookback_ttl_secs() -> u64 {
    4 * 3600
}

fn default_fallback_ttl_secs() -> u64 {
    300
}

fn default_min_ttl_secs() -> u64 {
    300
}

fn default_fallback_rates() -> HashMap<String, String> {
    HashMap::from([("usd_pln".to_string(), "4.0".to_string())])
}

fn default_user_agent() -> String {
    concat!("usage-metering/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for ExchangeRateConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            table: default_table(),
            request_timeout_secs: default_request_timeout_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            lookback_days: default_lookback_days(),
            publication_time: default_publication_time(),
            lookback_ttl_secs: default_lookback_ttl_secs(),
            fallback_ttl_secs: default_fallback_ttl_secs(),
            min_ttl_secs: default_min_ttl_secs(),
            fallback_rates: default_fallback_rates(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Error, Debug)]
pub enum RateError {
    #[error("HTTP error: {0}")]
    Http(String),
    /// Nothing published for that date (weekend, holiday)
    #[error("No rate table published for {0}")]
    NoData(NaiveDate),
    #[error("Failed to parse rate table: {0}")]
    Parse(String),
    #[error("No rate available for {from}/{to}")]
    UnsupportedPair { from: String, to: String },
    #[error("Converting {amount} {from} at {rate} overflows")]
    Overflow {
        amount: Decimal,
        from: String,
        rate: Decimal,
    },
}

/// One currency row of a published table, in PLN per unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRate {
    pub code: String,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateTable {
    pub no: String,
    pub effective_date: NaiveDate,
    pub rates: Vec<TableRate>,
}

impl RateTable {
    /// PLN paid per unit of `code`, using the ask side
    pub fn pln_per_unit(&self, code: &str) -> Option<Decimal> {
        if code == "PLN" {
            return Some(Decimal::ONE);
        }
        self.rates
            .iter()
            .find(|rate| rate.code.eq_ignore_ascii_case(code))
            .and_then(|rate| rate.ask)
    }

    /// `from -> to` through PLN
    pub fn cross_rate(&self, from: &str, to: &str) -> Option<Decimal> {
        let from_pln = self.pln_per_unit(from)?;
        let to_pln = self.pln_per_unit(to)?;
        from_pln.checked_div(to_pln)
    }
}

/// Upstream publisher of daily rate tables
#[async_trait]
pub trait RateSource: Send + Sync {
    async fn fetch_table(&self, date: NaiveDate) -> Result<RateTable, RateError>;
}

/// Where a rate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateOrigin {
    /// Today's table
    Current,
    /// The most recent table within the look-back window
    PreviousDay,
    /// Configured constant
    Fallback,
    /// Same currency on both sides
    Identity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateInfo {
    pub from: String,
    pub to: String,
    pub rate: Decimal,
    pub effective_date: NaiveDate,
    pub table_no: Option<String>,
    pub source: RateOrigin,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConvertedAmount {
    pub amount: Decimal,
    /// Rounded to two decimal places
    pub converted: Decimal,
    pub rate: RateInfo,
}
