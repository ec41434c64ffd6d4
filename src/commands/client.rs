use super::print_json;
use crate::database::NewClientOrganization;
use crate::engine::MeteringEngine;
use crate::metering::{ClientContext, units::to_nanos};
use clap::Subcommand;
use rust_decimal::Decimal;
use secrecy::SecretString;
use std::str::FromStr;
use tracing::info;

#[derive(Subcommand)]
pub enum ClientAction {
    /// Provision a client organization
    Create {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        /// Multiplier applied to raw provider cost, e.g. 1.5
        #[arg(long)]
        markup: String,
        /// Monthly spending limit in USD
        #[arg(long)]
        limit: Option<String>,
        /// Provider credential; only its SHA-256 hash is stored
        #[arg(long, env = "METERING_CLIENT_API_KEY", hide_env_values = true)]
        api_key: String,
    },
    /// Show one client organization
    Show {
        #[arg(long)]
        id: String,
    },
    /// List client organizations
    List {
        #[arg(long, help = "Include deactivated clients")]
        all: bool,
    },
    /// Change the markup rate
    SetMarkup {
        #[arg(long)]
        id: String,
        #[arg(long)]
        markup: String,
    },
    /// Set or clear the monthly spending limit
    SetLimit {
        #[arg(long)]
        id: String,
        /// Limit in USD; omit to remove the limit
        #[arg(long)]
        limit: Option<String>,
    },
    /// Deactivate a client; its history is kept
    Deactivate {
        #[arg(long)]
        id: String,
    },
}

pub async fn handle_client_command(
    action: ClientAction,
    engine: &MeteringEngine,
) -> Result<(), Box<dyn std::error::Error>> {
    let clients = engine.database.clients();

    let client = match action {
        ClientAction::Create {
            id,
            name,
            markup,
            limit,
            api_key,
        } => {
            validate_markup(&markup)?;
            let created = clients
                .create(NewClientOrganization {
                    id,
                    name,
                    api_key: SecretString::from(api_key),
                    markup_rate: markup,
                    monthly_limit_nanos: limit_nanos(limit.as_deref())?,
                })
                .await?;
            info!(client_org_id = %created.id, "Created client organization");
            created
        }
        ClientAction::Show { id } => clients
            .find_by_id(&id)
            .await?
            .ok_or_else(|| format!("Client organization not found: {id}"))?,
        ClientAction::List { all } => {
            let listed = clients.list(!all).await?;
            let contexts: Vec<ClientContext> = listed
                .iter()
                .filter_map(|client| ClientContext::try_from(client).ok())
                .collect();
            return print_json(&contexts);
        }
        ClientAction::SetMarkup { id, markup } => {
            validate_markup(&markup)?;
            clients.update_markup_rate(&id, &markup).await?
        }
        ClientAction::SetLimit { id, limit } => {
            clients
                .set_monthly_limit(&id, limit_nanos(limit.as_deref())?)
                .await?
        }
        ClientAction::Deactivate { id } => clients.deactivate(&id).await?,
    };

    print_json(&ClientContext::try_from(&client)?)
}

fn validate_markup(markup: &str) -> Result<(), String> {
    match Decimal::from_str(markup.trim()) {
        Ok(rate) if rate > Decimal::ZERO => Ok(()),
        Ok(rate) => Err(format!("Markup rate {rate} must be positive")),
        Err(e) => Err(format!("Markup rate '{markup}' is not a number: {e}")),
    }
}

fn limit_nanos(limit: Option<&str>) -> Result<Option<i64>, Box<dyn std::error::Error>> {
    match limit {
        None => Ok(None),
        Some(text) => {
            let usd = Decimal::from_str(text.trim())?;
            if usd < Decimal::ZERO {
                return Err(format!("Monthly limit {usd} must not be negative").into());
            }
            Ok(Some(to_nanos(usd)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_markup() {
        assert!(validate_markup("1.5").is_ok());
        assert!(validate_markup(" 2 ").is_ok());
        assert!(validate_markup("0").is_err());
        assert!(validate_markup("-1").is_err());
        assert!(validate_markup("lots").is_err());
    }

    #[test]
    fn test_limit_nanos() {
        assert_eq!(limit_nanos(None).unwrap(), None);
        assert_eq!(limit_nanos(Some("500")).unwrap(), Some(500_000_000_000));
        assert_eq!(limit_nanos(Some("0.25")).unwrap(), Some(250_000_000));
        assert!(limit_nanos(Some("-3")).is_err());
        assert!(limit_nanos(Some("abc")).is_err());
    }
}
