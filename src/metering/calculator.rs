//! Cost computation.
//!
//! Everything here is pure. Amounts are never rounded; rounding happens at
//! the storage boundary (`units`) or for display.

use super::event::UsageEvent;
use super::units::from_nanos;
use crate::database::entities::ClientOrganization;
use crate::error::{MeteringError, MeteringResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Read-only view of a client organization used for billing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientContext {
    pub client_org_id: String,
    pub name: String,
    pub markup_rate: Decimal,
    pub monthly_limit: Option<Decimal>,
    pub is_active: bool,
}

impl ClientContext {
    pub fn new(client_org_id: impl Into<String>, markup_rate: Decimal) -> Self {
        let client_org_id = client_org_id.into();
        Self {
            name: client_org_id.clone(),
            client_org_id,
            markup_rate,
            monthly_limit: None,
            is_active: true,
        }
    }
}

impl TryFrom<&ClientOrganization> for ClientContext {
    type Error = MeteringError;

    fn try_from(client: &ClientOrganization) -> MeteringResult<Self> {
        let invalid = |reason: String| MeteringError::InvalidClientConfig {
            client_org_id: client.id.clone(),
            reason,
        };

        let markup_rate = Decimal::from_str(client.markup_rate.trim())
            .map_err(|e| invalid(format!("markup rate '{}' is not a number: {e}", client.markup_rate)))?;
        if markup_rate <= Decimal::ZERO {
            return Err(invalid(format!("markup rate {markup_rate} must be positive")));
        }

        Ok(Self {
            client_org_id: client.id.clone(),
            name: client.name.clone(),
            markup_rate,
            monthly_limit: client.monthly_limit_nanos.map(from_nanos),
            is_active: client.is_active,
        })
    }
}

/// Cost of one generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationCost {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub raw_cost: Decimal,
    pub markup_cost: Decimal,
}

/// `raw_cost * markup_rate`, exactly
pub fn markup_cost(raw_cost: Decimal, markup_rate: Decimal) -> MeteringResult<Decimal> {
    if raw_cost < Decimal::ZERO {
        return Err(MeteringError::invalid(format!(
            "raw cost {raw_cost} is negative"
        )));
    }
    if markup_rate <= Decimal::ZERO {
        return Err(MeteringError::invalid(format!(
            "markup rate {markup_rate} must be positive"
        )));
    }
    raw_cost
        .checked_mul(markup_rate)
        .ok_or_else(|| MeteringError::invalid(format!("{raw_cost} x {markup_rate} overflows")))
}

pub fn generation_cost(event: &UsageEvent, client: &ClientContext) -> MeteringResult<GenerationCost> {
    if event.client_org_id != client.client_org_id {
        return Err(MeteringError::invalid(format!(
            "{}: event belongs to {}, not {}",
            event.generation_id, event.client_org_id, client.client_org_id
        )));
    }
    event.validate()?;

    Ok(GenerationCost {
        input_tokens: event.input_tokens,
        output_tokens: event.output_tokens,
        total_tokens: event.total_tokens(),
        raw_cost: event.raw_cost,
        markup_cost: markup_cost(event.raw_cost, client.markup_rate)?,
    })
}

/// Outcome of costing a batch. Failed events are skipped, never fatal.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResult {
    pub processed: usize,
    pub skipped: usize,
    pub total_raw_cost: Decimal,
    pub total_markup_cost: Decimal,
    pub total_tokens: i64,
    pub items: Vec<(String, GenerationCost)>,
    pub failures: Vec<(String, String)>,
}

pub fn batch_cost(events: &[UsageEvent], client: &ClientContext) -> BatchResult {
    let mut result = BatchResult::default();

    for event in events {
        match generation_cost(event, client) {
            Ok(cost) => {
                result.processed += 1;
                result.total_raw_cost += cost.raw_cost;
                result.total_markup_cost += cost.markup_cost;
                result.total_tokens += cost.total_tokens;
                result.items.push((event.generation_id.clone(), cost));
            }
            Err(e) => {
                tracing::warn!(
                    generation_id = %event.generation_id,
                    client_org_id = %client.client_org_id,
                    "Skipping event in batch: {}",
                    e
                );
                result.skipped += 1;
                result.failures.push((event.generation_id.clone(), e.to_string()));
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metering::event::TokenSource;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn event(id: &str, raw_cost: Decimal) -> UsageEvent {
        UsageEvent {
            generation_id: id.to_string(),
            client_org_id: "acme".to_string(),
            user_id: "alice".to_string(),
            model: "openai/gpt-4o".to_string(),
            provider: "openai".to_string(),
            input_tokens: 1000,
            output_tokens: 500,
            raw_cost,
            token_source: TokenSource::Explicit,
        }
    }

    #[test]
    fn test_markup_cost_is_exact() {
        assert_eq!(markup_cost(dec!(0.01), dec!(1.3)).unwrap(), dec!(0.013));
        assert_eq!(markup_cost(Decimal::ZERO, dec!(1.3)).unwrap(), Decimal::ZERO);
        assert_eq!(
            markup_cost(dec!(0.000000001), dec!(1.15)).unwrap(),
            dec!(0.00000000115)
        );
    }

    #[test]
    fn test_markup_cost_rejects_bad_input() {
        assert!(matches!(
            markup_cost(dec!(-0.01), dec!(1.3)),
            Err(MeteringError::InvalidInput(_))
        ));
        assert!(matches!(
            markup_cost(dec!(0.01), Decimal::ZERO),
            Err(MeteringError::InvalidInput(_))
        ));
        assert!(matches!(
            markup_cost(dec!(0.01), dec!(-1)),
            Err(MeteringError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_generation_cost() {
        let client = ClientContext::new("acme", dec!(1.3));
        let cost = generation_cost(&event("gen-001", dec!(0.01)), &client).unwrap();

        assert_eq!(cost.total_tokens, 1500);
        assert_eq!(cost.raw_cost, dec!(0.01));
        assert_eq!(cost.markup_cost, dec!(0.013));
    }

    #[test]
    fn test_generation_cost_rejects_foreign_event() {
        let client = ClientContext::new("globex", dec!(1.3));
        assert!(generation_cost(&event("gen-001", dec!(0.01)), &client).is_err());
    }

    #[test]
    fn test_batch_partial_failure() {
        let client = ClientContext::new("acme", dec!(2));
        let events = vec![
            event("gen-1", dec!(0.01)),
            event("gen-2", dec!(-0.5)),
            event("gen-3", dec!(0.02)),
        ];

        let result = batch_cost(&events, &client);
        assert_eq!(result.processed, 2);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.total_raw_cost, dec!(0.03));
        assert_eq!(result.total_markup_cost, dec!(0.06));
        assert_eq!(result.total_tokens, 3000);
        assert_eq!(result.items.len(), 2);
        assert_eq!(result.failures[0].0, "gen-2");
    }

    #[test]
    fn test_client_context_from_model() {
        let now = Utc::now();
        let mut client = ClientOrganization {
            id: "acme".to_string(),
            name: "Acme Corp".to_string(),
            api_key_hash: String::new(),
            markup_rate: "1.3".to_string(),
            monthly_limit_nanos: Some(50_000_000_000),
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let context = ClientContext::try_from(&client).unwrap();
        assert_eq!(context.markup_rate, dec!(1.3));
        assert_eq!(context.monthly_limit, Some(dec!(50)));

        client.markup_rate = "0".to_string();
        assert!(matches!(
            ClientContext::try_from(&client),
            Err(MeteringError::InvalidClientConfig { .. })
        ));

        client.markup_rate = "lots".to_string();
        assert!(matches!(
            ClientContext::try_from(&client),
            Err(MeteringError::InvalidClientConfig { .. })
        ));
    }
}
