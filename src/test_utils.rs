use crate::{
    cache::CacheManager,
    clock::{Clock, ManualClock},
    config::Config,
    database::{
        DatabaseManager, DatabaseManagerImpl, NewClientOrganization, entities::ClientOrganization,
    },
    engine::MeteringEngine,
    exchange::{RateError, RateSource, RateTable},
    metering::{RecordOutcome, TokenSource, UsageEvent},
};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use secrecy::SecretString;
use std::str::FromStr;
use std::sync::Arc;

/// Rate source with nothing published, so every lookup falls back
pub struct NoRateSource;

#[async_trait]
impl RateSource for NoRateSource {
    async fn fetch_table(&self, date: NaiveDate) -> Result<RateTable, RateError> {
        Err(RateError::NoData(date))
    }
}

/// Builds a `MeteringEngine` over in-memory SQLite and an in-memory cache,
/// driven by a `ManualClock`
pub struct TestEngineBuilder {
    config: Config,
    today: NaiveDate,
    rate_source: Arc<dyn RateSource>,
}

impl TestEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            today: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
            rate_source: Arc::new(NoRateSource),
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Date the manual clock starts on (noon UTC)
    pub fn on(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn with_rate_source(mut self, source: Arc<dyn RateSource>) -> Self {
        self.rate_source = source;
        self
    }

    pub async fn build(self) -> TestEngine {
        let mut config = self.config;
        config.database.url = "sqlite::memory:".to_string();
        config.cache.backend = "memory".to_string();
        config.metrics.enabled = false;
        config.jobs.enabled = false;

        let cache = Arc::new(CacheManager::new_memory());
        let database: Arc<dyn DatabaseManager> = Arc::new(
            DatabaseManagerImpl::new_from_config(&config.database, cache)
                .await
                .unwrap(),
        );
        database.migrate().await.unwrap();

        let clock = ManualClock::on(self.today);
        let engine = MeteringEngine::with_components(
            config,
            database,
            Arc::new(clock.clone()),
            self.rate_source,
        )
        .unwrap();

        TestEngine { engine, clock }
    }
}

impl Default for TestEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TestEngine {
    pub engine: MeteringEngine,
    pub clock: ManualClock,
}

impl TestEngine {
    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Move the clock to noon of `date`
    pub fn set_date(&self, date: NaiveDate) {
        self.clock.set_date(date);
    }

    pub async fn create_client(&self, id: &str, markup_rate: &str) -> ClientOrganization {
        self.create_client_with_limit(id, markup_rate, None).await
    }

    pub async fn create_client_with_limit(
        &self,
        id: &str,
        markup_rate: &str,
        monthly_limit_nanos: Option<i64>,
    ) -> ClientOrganization {
        self.engine
            .database
            .clients()
            .create(NewClientOrganization {
                id: id.to_string(),
                name: format!("{id} inc"),
                api_key: SecretString::from(format!("sk-{id}")),
                markup_rate: markup_rate.to_string(),
                monthly_limit_nanos,
            })
            .await
            .unwrap()
    }

    /// Record an event and return the outcome, panicking on errors
    pub async fn record(&self, event: &UsageEvent) -> RecordOutcome {
        self.engine.recorder.record(event).await.unwrap()
    }
}

/// Event with explicit token counts; `cost` is decimal text in USD
pub fn usage_event(
    generation_id: &str,
    client_org_id: &str,
    user_id: &str,
    model: &str,
    input_tokens: i64,
    output_tokens: i64,
    cost: &str,
) -> UsageEvent {
    let provider = model
        .split_once('/')
        .map(|(provider, _)| provider.to_string())
        .unwrap_or_else(|| "openrouter".to_string());

    UsageEvent {
        generation_id: generation_id.to_string(),
        client_org_id: client_org_id.to_string(),
        user_id: user_id.to_string(),
        model: model.to_string(),
        provider,
        input_tokens,
        output_tokens,
        raw_cost: Decimal::from_str(cost).unwrap(),
        token_source: TokenSource::Explicit,
    }
}
