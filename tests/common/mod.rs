use chrono::NaiveDate;
use usage_metering::test_utils::{TestEngine, TestEngineBuilder};

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

/// Engine on `today` with `acme` (markup 1.3) provisioned
#[allow(dead_code)]
pub async fn acme_engine(today: NaiveDate) -> TestEngine {
    let harness = TestEngineBuilder::new().on(today).build().await;
    harness.create_client("acme", "1.3").await;
    harness
}
