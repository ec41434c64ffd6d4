use crate::cache::CacheError;
use crate::database::DatabaseError;
use chrono::NaiveDate;
use thiserror::Error;

/// Failures of the metering engine itself.
///
/// A duplicate generation is not an error; see `RecordOutcome::Duplicate`.
#[derive(Error, Debug)]
pub enum MeteringError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Client organization not found: {0}")]
    ClientNotFound(String),
    #[error("Invalid configuration for client {client_org_id}: {reason}")]
    InvalidClientConfig {
        client_org_id: String,
        reason: String,
    },
    #[error(
        "Clock skew detected for client {client_org_id}: live counter is dated {counter_date}, event is dated {event_date}"
    )]
    ClockSkewDetected {
        client_org_id: String,
        counter_date: NaiveDate,
        event_date: NaiveDate,
    },
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl MeteringError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Short label used for metrics and batch reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::ClientNotFound(_) => "client_not_found",
            Self::InvalidClientConfig { .. } => "invalid_client_config",
            Self::ClockSkewDetected { .. } => "clock_skew",
            Self::Database(_) => "database",
        }
    }
}

impl From<sea_orm::DbErr> for MeteringError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(DatabaseError::from(err))
    }
}

pub type MeteringResult<T> = Result<T, MeteringError>;

/// Process-level errors: startup, jobs and CLI commands
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("Metering error: {0}")]
    Metering(#[from] MeteringError),
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metering_error_display() {
        let err = MeteringError::ClockSkewDetected {
            client_org_id: "acme".to_string(),
            counter_date: NaiveDate::from_ymd_opt(2024, 4, 2).unwrap(),
            event_date: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
        };
        assert_eq!(
            err.to_string(),
            "Clock skew detected for client acme: live counter is dated 2024-04-02, event is dated 2024-04-01"
        );

        let err = MeteringError::InvalidClientConfig {
            client_org_id: "acme".to_string(),
            reason: "markup rate must be positive".to_string(),
        };
        assert!(err.to_string().contains("acme"));
        assert_eq!(err.kind(), "invalid_client_config");
    }

    #[test]
    fn test_app_error_from_metering() {
        let err: AppError = MeteringError::invalid("negative cost").into();
        assert_eq!(
            err.to_string(),
            "Metering error: Invalid input: negative cost"
        );
    }

    #[test]
    fn test_app_error_from_config_error() {
        let err: AppError = config::ConfigError::NotFound("metering".to_string()).into();
        assert!(matches!(err, AppError::Config(_)));
        assert!(err.to_string().contains("Configuration error"));
    }
}
