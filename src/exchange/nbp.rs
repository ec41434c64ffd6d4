//! National Bank of Poland rate tables.
//!
//! `GET {base}/exchangerates/tables/{table}/{YYYY-MM-DD}/?format=json`
//! answers 404 for days without a publication.

use super::{ExchangeRateConfig, RateError, RateSource, RateTable, TableRate};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct NbpTable {
    no: String,
    #[serde(rename = "effectiveDate")]
    effective_date: NaiveDate,
    #[serde(default)]
    rates: Vec<NbpRate>,
}

#[derive(Debug, Deserialize)]
struct NbpRate {
    code: String,
    #[serde(default)]
    bid: Option<f64>,
    #[serde(default)]
    ask: Option<f64>,
    /// Tables A and B publish a single mid rate
    #[serde(default)]
    mid: Option<f64>,
}

pub struct NbpRateSource {
    client: reqwest::Client,
    base_url: String,
    table: String,
}

impl NbpRateSource {
    pub fn new(config: &ExchangeRateConfig) -> Result<Self, RateError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| RateError::Http(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            table: config.table.to_lowercase(),
        })
    }

    fn table_url(&self, date: NaiveDate) -> String {
        format!(
            "{}/exchangerates/tables/{}/{}/?format=json",
            self.base_url,
            self.table,
            date.format("%Y-%m-%d")
        )
    }
}

#[async_trait]
impl RateSource for NbpRateSource {
    async fn fetch_table(&self, date: NaiveDate) -> Result<RateTable, RateError> {
        let url = self.table_url(date);
        debug!(%url, "Fetching exchange rate table");

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| RateError::Http(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(RateError::NoData(date)),
            status if !status.is_success() => {
                return Err(RateError::Http(format!("{url} returned {status}")));
            }
            _ => {}
        }

        let tables: Vec<NbpTable> = response
            .json()
            .await
            .map_err(|e| RateError::Parse(e.to_string()))?;
        let table = tables
            .into_iter()
            .next()
            .ok_or_else(|| RateError::Parse("empty table list".to_string()))?;

        Ok(RateTable {
            no: table.no,
            effective_date: table.effective_date,
            rates: table
                .rates
                .into_iter()
                .map(|rate| TableRate {
                    code: rate.code.to_uppercase(),
                    bid: rate.bid.or(rate.mid).and_then(decimal),
                    ask: rate.ask.or(rate.mid).and_then(decimal),
                })
                .collect(),
        })
    }
}

fn decimal(value: f64) -> Option<Decimal> {
    Decimal::from_str(&value.to_string())
        .ok()
        .or_else(|| Decimal::from_f64(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_url() {
        let config = ExchangeRateConfig {
            base_url: "https://api.nbp.pl/api/".to_string(),
            ..Default::default()
        };
        let source = NbpRateSource::new(&config).unwrap();
        assert_eq!(
            source.table_url(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()),
            "https://api.nbp.pl/api/exchangerates/tables/c/2024-01-15/?format=json"
        );
    }

    #[test]
    fn test_parse_table_c() {
        let body = r#"[{"table":"C","no":"010/C/NBP/2024","tradingDate":"2024-01-12",
            "effectiveDate":"2024-01-15","rates":[
            {"currency":"dolar amerykański","code":"USD","bid":3.9512,"ask":4.0310},
            {"currency":"euro","code":"EUR","bid":4.3201,"ask":4.4073}]}]"#;
        let tables: Vec<NbpTable> = serde_json::from_str(body).unwrap();
        assert_eq!(tables[0].no, "010/C/NBP/2024");
        assert_eq!(tables[0].rates.len(), 2);
        assert_eq!(decimal(tables[0].rates[0].ask.unwrap()), Some(Decimal::new(40310, 4)));
    }
}
