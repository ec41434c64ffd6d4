use super::{
    ConvertedAmount, ExchangeRateConfig, RateError, RateInfo, RateOrigin, RateSource, RateTable,
};
use crate::cache::{CacheManager, TypedCache, typed_cache};
use crate::clock::Clock;
use chrono::{DateTime, Days, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cached lookup result. The rate is kept as text so every cache backend
/// round-trips it exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[typed_cache(prefix = "exchange_rate")]
struct CachedRate {
    from: String,
    to: String,
    rate: String,
    effective_date: NaiveDate,
    table_no: Option<String>,
    source: RateOrigin,
    fetched_at: DateTime<Utc>,
}

impl From<&RateInfo> for CachedRate {
    fn from(info: &RateInfo) -> Self {
        Self {
            from: info.from.clone(),
            to: info.to.clone(),
            rate: info.rate.to_string(),
            effective_date: info.effective_date,
            table_no: info.table_no.clone(),
            source: info.source,
            fetched_at: info.fetched_at,
        }
    }
}

impl CachedRate {
    fn into_info(self) -> Option<RateInfo> {
        Some(RateInfo {
            rate: Decimal::from_str(&self.rate).ok()?,
            from: self.from,
            to: self.to,
            effective_date: self.effective_date,
            table_no: self.table_no,
            source: self.source,
            fetched_at: self.fetched_at,
        })
    }
}

pub struct ExchangeRateProvider {
    config: ExchangeRateConfig,
    source: Arc<dyn RateSource>,
    cache: TypedCache<CachedRate>,
    clock: Arc<dyn Clock>,
    /// Zone of `publication_time`
    offset: FixedOffset,
    publication_time: NaiveTime,
}

impl ExchangeRateProvider {
    pub fn new(
        config: ExchangeRateConfig,
        source: Arc<dyn RateSource>,
        cache: &CacheManager,
        clock: Arc<dyn Clock>,
        offset: FixedOffset,
    ) -> Self {
        let publication_time = NaiveTime::parse_from_str(&config.publication_time, "%H:%M")
            .unwrap_or_else(|e| {
                warn!(
                    value = %config.publication_time,
                    "Invalid rate publication time, using 08:15: {}", e
                );
                NaiveTime::from_hms_opt(8, 15, 0).unwrap_or(NaiveTime::MIN)
            });

        Self {
            config,
            source,
            cache: cache.cache(),
            clock,
            offset,
            publication_time,
        }
    }

    fn cache_key(from: &str, to: &str) -> String {
        format!("{}_{}_rate", from.to_lowercase(), to.to_lowercase())
    }

    /// Rate for `from -> to`. Source failures end in the configured
    /// fallback; only a pair with no fallback is an error.
    pub async fn current_rate(&self, from: &str, to: &str) -> Result<RateInfo, RateError> {
        let from = from.trim().to_uppercase();
        let to = to.trim().to_uppercase();
        let now = self.clock.now();

        if from == to {
            return Ok(RateInfo {
                rate: Decimal::ONE,
                effective_date: self.clock.today(),
                table_no: None,
                source: RateOrigin::Identity,
                fetched_at: now,
                from,
                to,
            });
        }

        let key = Self::cache_key(&from, &to);
        match self.cache.get(&key).await {
            Ok(Some(cached)) => {
                if let Some(info) = cached.into_info() {
                    debug!(%from, %to, rate = %info.rate, "Exchange rate served from cache");
                    return Ok(info);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(%from, %to, "Exchange rate cache read failed: {}", e),
        }

        let fetch_timeout = Duration::from_secs(self.config.fetch_timeout_secs);
        let fetched = match tokio::time::timeout(fetch_timeout, self.fetch_with_lookback(&from, &to))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(RateError::Http(format!(
                "rate lookup timed out after {}s",
                fetch_timeout.as_secs()
            ))),
        };

        let info = match fetched {
            Ok(info) => info,
            Err(e) => {
                warn!(%from, %to, "Exchange rate source unavailable, using fallback: {}", e);
                self.fallback(&from, &to, now)?
            }
        };

        let ttl = self.ttl_for(&info, now);
        if let Err(e) = self
            .cache
            .set_with_ttl(&key, &CachedRate::from(&info), Some(ttl))
            .await
        {
            warn!(%from, %to, "Exchange rate cache write failed: {}", e);
        }

        info!(
            %from,
            %to,
            rate = %info.rate,
            source = ?info.source,
            effective_date = %info.effective_date,
            ttl_secs = ttl.as_secs(),
            "Exchange rate resolved"
        );
        Ok(info)
    }

    pub async fn convert(
        &self,
        amount: Decimal,
        from: &str,
        to: &str,
    ) -> Result<ConvertedAmount, RateError> {
        let rate = self.current_rate(from, to).await?;
        let converted = amount
            .checked_mul(rate.rate)
            .ok_or_else(|| RateError::Overflow {
                amount,
                from: rate.from.clone(),
                rate: rate.rate,
            })?
            .round_dp(2);
        Ok(ConvertedAmount {
            amount,
            converted,
            rate,
        })
    }

    /// Drop the cached pair so the next lookup goes to the source
    pub async fn invalidate(&self, from: &str, to: &str) {
        let key = Self::cache_key(from.trim(), to.trim());
        if let Err(e) = self.cache.delete(&key).await {
            warn!(%key, "Exchange rate cache invalidation failed: {}", e);
        }
    }

    /// Today's table, then one day back at a time while the source has no data
    async fn fetch_with_lookback(&self, from: &str, to: &str) -> Result<RateInfo, RateError> {
        let today = self.clock.today();

        for days_back in 0..=self.config.lookback_days {
            let Some(date) = today.checked_sub_days(Days::new(u64::from(days_back))) else {
                break;
            };
            match self.source.fetch_table(date).await {
                Ok(table) => {
                    let origin = if days_back == 0 {
                        RateOrigin::Current
                    } else {
                        RateOrigin::PreviousDay
                    };
                    return self.rate_from_table(&table, from, to, origin);
                }
                Err(RateError::NoData(_)) => {
                    debug!(%date, "No rate table published, stepping back");
                }
                Err(e) => return Err(e),
            }
        }

        Err(RateError::NoData(today))
    }

    fn rate_from_table(
        &self,
        table: &RateTable,
        from: &str,
        to: &str,
        origin: RateOrigin,
    ) -> Result<RateInfo, RateError> {
        let rate = table
            .cross_rate(from, to)
            .ok_or_else(|| RateError::UnsupportedPair {
                from: from.to_string(),
                to: to.to_string(),
            })?;

        Ok(RateInfo {
            from: from.to_string(),
            to: to.to_string(),
            rate,
            effective_date: table.effective_date,
            table_no: Some(table.no.clone()),
            source: origin,
            fetched_at: self.clock.now(),
        })
    }

    fn fallback(&self, from: &str, to: &str, now: DateTime<Utc>) -> Result<RateInfo, RateError> {
        let configured = |a: &str, b: &str| {
            self.config
                .fallback_rates
                .get(&format!("{}_{}", a.to_lowercase(), b.to_lowercase()))
                .and_then(|value| Decimal::from_str(value.trim()).ok())
                .filter(|rate| *rate > Decimal::ZERO)
        };

        let rate = configured(from, to)
            .or_else(|| configured(to, from).and_then(|rate| Decimal::ONE.checked_div(rate)))
            .ok_or_else(|| RateError::UnsupportedPair {
                from: from.to_string(),
                to: to.to_string(),
            })?;

        crate::metrics::exchange_rate_fallback();
        Ok(RateInfo {
            from: from.to_string(),
            to: to.to_string(),
            rate,
            effective_date: self.clock.today(),
            table_no: None,
            source: RateOrigin::Fallback,
            fetched_at: now,
        })
    }

    /// How long a resolved rate may be served from cache
    fn ttl_for(&self, info: &RateInfo, now: DateTime<Utc>) -> Duration {
        let min_ttl = Duration::from_secs(self.config.min_ttl_secs);
        let until_publication = (self.next_publication(now) - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
            .max(min_ttl);

        match info.source {
            RateOrigin::Current | RateOrigin::Identity => until_publication,
            RateOrigin::PreviousDay => {
                until_publication.min(Duration::from_secs(self.config.lookback_ttl_secs))
            }
            RateOrigin::Fallback => Duration::from_secs(self.config.fallback_ttl_secs),
        }
    }

    /// First publication instant strictly after `now`
    fn next_publication(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = now.with_timezone(&self.offset);
        let mut day = local.date_naive();
        if local.time() >= self.publication_time {
            day = day.succ_opt().unwrap_or(day);
        }
        self.offset
            .from_local_datetime(&day.and_time(self.publication_time))
            .single()
            .map(|at| at.with_timezone(&Utc))
            .unwrap_or(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::exchange::TableRate;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    /// Serves a fixed table for the listed dates and 404s everything else
    struct StubSource {
        tables: Vec<RateTable>,
        fail: bool,
        calls: Mutex<Vec<NaiveDate>>,
    }

    #[async_trait]
    impl RateSource for StubSource {
        async fn fetch_table(&self, date: NaiveDate) -> Result<RateTable, RateError> {
            self.calls.lock().unwrap().push(date);
            if self.fail {
                return Err(RateError::Http("500".to_string()));
            }
            self.tables
                .iter()
                .find(|table| table.effective_date == date)
                .cloned()
                .ok_or(RateError::NoData(date))
        }
    }

    fn table(date: NaiveDate) -> RateTable {
        RateTable {
            no: "010/C/NBP/2024".to_string(),
            effective_date: date,
            rates: vec![
                TableRate {
                    code: "USD".to_string(),
                    bid: Some(dec!(3.95)),
                    ask: Some(dec!(4.03)),
                },
                TableRate {
                    code: "EUR".to_string(),
                    bid: Some(dec!(4.30)),
                    ask: Some(dec!(4.40)),
                },
            ],
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn build(source: StubSource, clock: ManualClock) -> (ExchangeRateProvider, Arc<StubSource>) {
        let source = Arc::new(source);
        let provider = ExchangeRateProvider::new(
            ExchangeRateConfig::default(),
            source.clone(),
            &CacheManager::new_memory(),
            Arc::new(clock),
            FixedOffset::east_opt(0).unwrap(),
        );
        (provider, source)
    }

    fn stub(tables: Vec<RateTable>, fail: bool) -> StubSource {
        StubSource {
            tables,
            fail,
            calls: Mutex::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn test_current_rate_and_cache() {
        let clock = ManualClock::on(date(2024, 1, 15));
        let (provider, source) = build(stub(vec![table(date(2024, 1, 15))], false), clock);

        let info = provider.current_rate("usd", "pln").await.unwrap();
        assert_eq!(info.rate, dec!(4.03));
        assert_eq!(info.source, RateOrigin::Current);

        // second lookup does not reach the source
        provider.current_rate("USD", "PLN").await.unwrap();
        assert_eq!(source.calls.lock().unwrap().len(), 1);

        provider.invalidate("USD", "PLN").await;
        provider.current_rate("USD", "PLN").await.unwrap();
        assert_eq!(source.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_steps_back_over_weekend() {
        // Sunday; Friday's table is the latest
        let clock = ManualClock::on(date(2024, 1, 14));
        let (provider, source) = build(stub(vec![table(date(2024, 1, 12))], false), clock);

        let info = provider.current_rate("USD", "PLN").await.unwrap();
        assert_eq!(info.source, RateOrigin::PreviousDay);
        assert_eq!(info.effective_date, date(2024, 1, 12));
        assert_eq!(source.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_fallback_on_error_and_exhausted_lookback() {
        let clock = ManualClock::on(date(2024, 1, 15));
        let (provider, _) = build(stub(vec![], true), clock.clone());
        let info = provider.current_rate("USD", "PLN").await.unwrap();
        assert_eq!(info.source, RateOrigin::Fallback);
        assert_eq!(info.rate, dec!(4.0));

        let (provider, source) = build(stub(vec![], false), clock);
        let info = provider.current_rate("USD", "PLN").await.unwrap();
        assert_eq!(info.source, RateOrigin::Fallback);
        // today plus seven days back
        assert_eq!(source.calls.lock().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_cross_inverse_and_identity() {
        let clock = ManualClock::on(date(2024, 1, 15));
        let (provider, _) = build(stub(vec![table(date(2024, 1, 15))], false), clock);

        let inverse = provider.current_rate("PLN", "USD").await.unwrap();
        assert_eq!(inverse.rate, Decimal::ONE / dec!(4.03));

        let cross = provider.current_rate("EUR", "USD").await.unwrap();
        assert_eq!(cross.rate, dec!(4.40) / dec!(4.03));

        let identity = provider.current_rate("USD", "usd").await.unwrap();
        assert_eq!(identity.source, RateOrigin::Identity);
        assert_eq!(identity.rate, Decimal::ONE);
    }

    #[tokio::test]
    async fn test_unsupported_pair_without_fallback() {
        let clock = ManualClock::on(date(2024, 1, 15));
        let (provider, _) = build(stub(vec![table(date(2024, 1, 15))], false), clock);

        let err = provider.current_rate("JPY", "PLN").await.unwrap_err();
        assert!(matches!(err, RateError::UnsupportedPair { .. }));
    }

    #[tokio::test]
    async fn test_convert_rounds_for_display() {
        let clock = ManualClock::on(date(2024, 1, 15));
        let (provider, _) = build(stub(vec![table(date(2024, 1, 15))], false), clock);

        let converted = provider.convert(dec!(12.345), "USD", "PLN").await.unwrap();
        assert_eq!(converted.converted, dec!(49.75));
        assert_eq!(converted.amount, dec!(12.345));
    }

    #[tokio::test]
    async fn test_convert_overflow_is_an_error() {
        let clock = ManualClock::on(date(2024, 1, 15));
        let (provider, _) = build(stub(vec![table(date(2024, 1, 15))], false), clock);

        let err = provider.convert(Decimal::MAX, "USD", "PLN").await.unwrap_err();
        assert!(matches!(err, RateError::Overflow { .. }));
    }

    #[test]
    fn test_ttl_rules() {
        // 07:15 UTC, one hour before publication
        let clock = ManualClock::new(
            date(2024, 1, 15).and_hms_opt(7, 15, 0).unwrap().and_utc(),
        );
        let now = clock.now();
        let (provider, _) = build(stub(vec![], false), clock);

        let mut info = RateInfo {
            from: "USD".to_string(),
            to: "PLN".to_string(),
            rate: dec!(4.03),
            effective_date: date(2024, 1, 12),
            table_no: None,
            source: RateOrigin::Current,
            fetched_at: now,
        };
        assert_eq!(provider.ttl_for(&info, now), Duration::from_secs(3600));

        info.source = RateOrigin::PreviousDay;
        assert_eq!(provider.ttl_for(&info, now), Duration::from_secs(3600));

        info.source = RateOrigin::Fallback;
        assert_eq!(provider.ttl_for(&info, now), Duration::from_secs(300));

        // right after publication the next one is a day away, capped for look-back data
        let later = date(2024, 1, 15).and_hms_opt(8, 16, 0).unwrap().and_utc();
        info.source = RateOrigin::PreviousDay;
        assert_eq!(provider.ttl_for(&info, later), Duration::from_secs(4 * 3600));
        info.source = RateOrigin::Current;
        assert_eq!(
            provider.ttl_for(&info, later),
            Duration::from_secs(24 * 3600 - 60)
        );

        // never below the minimum
        let almost = date(2024, 1, 15).and_hms_opt(8, 14, 0).unwrap().and_utc();
        assert_eq!(provider.ttl_for(&info, almost), Duration::from_secs(300));
    }
}
