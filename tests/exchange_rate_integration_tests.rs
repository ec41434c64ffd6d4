mod common;

use chrono::FixedOffset;
use common::date;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use usage_metering::cache::CacheManager;
use usage_metering::clock::ManualClock;
use usage_metering::exchange::{
    ExchangeRateConfig, ExchangeRateProvider, NbpRateSource, RateOrigin, RateSource,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn table_body(effective_date: &str, usd_ask: f64) -> serde_json::Value {
    serde_json::json!([{
        "table": "C",
        "no": "064/C/NBP/2024",
        "tradingDate": effective_date,
        "effectiveDate": effective_date,
        "rates": [
            {"currency": "dolar amerykański", "code": "USD", "bid": usd_ask - 0.08, "ask": usd_ask},
            {"currency": "euro", "code": "EUR", "bid": 4.2512, "ask": 4.3370}
        ]
    }])
}

fn config(server: &MockServer) -> ExchangeRateConfig {
    ExchangeRateConfig {
        base_url: server.uri(),
        request_timeout_secs: 1,
        fetch_timeout_secs: 5,
        ..Default::default()
    }
}

fn provider(config: ExchangeRateConfig, today: chrono::NaiveDate) -> ExchangeRateProvider {
    let source: Arc<dyn RateSource> = Arc::new(NbpRateSource::new(&config).unwrap());
    ExchangeRateProvider::new(
        config,
        source,
        &CacheManager::new_memory(),
        Arc::new(ManualClock::on(today)),
        FixedOffset::east_opt(0).unwrap(),
    )
}

#[tokio::test]
async fn test_current_table() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/exchangerates/tables/c/2024-04-02/"))
        .and(query_param("format", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(table_body("2024-04-02", 4.0134)))
        .expect(1)
        .mount(&server)
        .await;

    let rates = provider(config(&server), date(2024, 4, 2));
    let info = rates.current_rate("USD", "PLN").await.unwrap();
    assert_eq!(info.rate, dec!(4.0134));
    assert_eq!(info.source, RateOrigin::Current);
    assert_eq!(info.table_no.as_deref(), Some("064/C/NBP/2024"));

    // served from cache; the mock expects exactly one request
    let cached = rates.current_rate("usd", "pln").await.unwrap();
    assert_eq!(cached.rate, dec!(4.0134));

    let converted = rates.convert(dec!(12.50), "USD", "PLN").await.unwrap();
    assert_eq!(converted.converted, dec!(50.17));
}

#[tokio::test]
async fn test_steps_back_over_404() {
    let server = MockServer::start().await;
    for day in ["2024-03-31", "2024-03-30"] {
        Mock::given(method("GET"))
            .and(path(format!("/exchangerates/tables/c/{day}/")))
            .respond_with(ResponseTemplate::new(404).set_body_string("404 NotFound - Not Found - Brak danych"))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/exchangerates/tables/c/2024-03-29/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(table_body("2024-03-29", 4.0321)))
        .mount(&server)
        .await;

    let rates = provider(config(&server), date(2024, 3, 31));
    let info = rates.current_rate("USD", "PLN").await.unwrap();
    assert_eq!(info.source, RateOrigin::PreviousDay);
    assert_eq!(info.effective_date, date(2024, 3, 29));
    assert_eq!(info.rate, dec!(4.0321));
}

#[tokio::test]
async fn test_server_error_uses_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let rates = provider(config(&server), date(2024, 4, 2));
    let info = rates.current_rate("USD", "PLN").await.unwrap();
    assert_eq!(info.source, RateOrigin::Fallback);
    assert_eq!(info.rate, dec!(4.0));

    // inverse of the configured pair
    let inverse = rates.current_rate("PLN", "USD").await.unwrap();
    assert_eq!(inverse.source, RateOrigin::Fallback);
    assert_eq!(inverse.rate, dec!(0.25));
}

#[tokio::test]
async fn test_exhausted_lookback_uses_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(8)
        .mount(&server)
        .await;

    let rates = provider(config(&server), date(2024, 4, 2));
    let info = rates.current_rate("USD", "PLN").await.unwrap();
    assert_eq!(info.source, RateOrigin::Fallback);
}

#[tokio::test]
async fn test_slow_source_times_out_to_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(table_body("2024-04-02", 4.0134))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let rates = provider(config(&server), date(2024, 4, 2));
    let started = std::time::Instant::now();
    let info = rates.current_rate("USD", "PLN").await.unwrap();
    assert_eq!(info.source, RateOrigin::Fallback);
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_unsupported_pair_without_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let rates = provider(config(&server), date(2024, 4, 2));
    assert!(rates.current_rate("USD", "JPY").await.is_err());
}
