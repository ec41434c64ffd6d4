use super::{Job, JobResult};
use crate::error::AppError;
use crate::exchange::{ExchangeRateProvider, RateOrigin};
use async_trait::async_trait;
use std::sync::Arc;

/// Replaces the cached USD/PLN rate once the day's table is out
pub struct ExchangeRateRefreshJob {
    provider: Arc<ExchangeRateProvider>,
}

impl ExchangeRateRefreshJob {
    pub fn new(provider: Arc<ExchangeRateProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Job for ExchangeRateRefreshJob {
    fn name(&self) -> &str {
        "exchange_rate_refresh"
    }

    async fn execute(&self) -> Result<JobResult, AppError> {
        self.provider.invalidate("USD", "PLN").await;

        let info = self
            .provider
            .current_rate("USD", "PLN")
            .await
            .map_err(|e| AppError::Internal(format!("Exchange rate refresh failed: {e}")))?;

        let message = format!(
            "USD/PLN {} from {} ({:?})",
            info.rate, info.effective_date, info.source
        );
        Ok(match info.source {
            RateOrigin::Fallback => JobResult::failure(message),
            _ => JobResult {
                success: true,
                message,
                items_processed: 1,
            },
        })
    }
}
