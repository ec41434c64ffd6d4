//! Inbound usage payloads and their canonical form.
//!
//! Providers and sync jobs name the same fields differently. Everything is
//! folded into one `UsageEvent` here so nothing downstream has to care.

use crate::config::MeteringConfig;
use crate::error::{MeteringError, MeteringResult};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Usage payload as delivered by a webhook or a batch sync
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawUsageEvent {
    #[serde(default, alias = "id")]
    pub generation_id: Option<String>,
    #[serde(default, alias = "client_id")]
    pub client_org_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, alias = "prompt_tokens", alias = "input_tokens")]
    pub tokens_prompt: Option<i64>,
    #[serde(default, alias = "completion_tokens", alias = "output_tokens")]
    pub tokens_completion: Option<i64>,
    #[serde(default, alias = "total_tokens")]
    pub tokens_used: Option<i64>,
    /// Raw provider cost in USD
    #[serde(default, alias = "cost", alias = "total_cost")]
    pub usage: Option<f64>,
    #[serde(default, alias = "user_id", alias = "user")]
    pub external_user: Option<String>,
}

/// How input and output tokens were obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSource {
    Explicit,
    Estimated,
}

/// Upper bound on the tokens one generation may report. Keeps every
/// running counter far from `i64` overflow.
pub const MAX_EVENT_TOKENS: i64 = 1_000_000_000_000;

/// Split applied when only a combined token count is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSplitPolicy {
    input_share_percent: u8,
}

impl TokenSplitPolicy {
    pub fn new(input_share_percent: u8) -> MeteringResult<Self> {
        if input_share_percent > 100 {
            return Err(MeteringError::invalid(format!(
                "input share {input_share_percent}% is above 100%"
            )));
        }
        Ok(Self {
            input_share_percent,
        })
    }

    pub fn input_share_percent(&self) -> u8 {
        self.input_share_percent
    }

    /// `(input, output)` with input rounded down. Never overflows:
    /// `total = 100q + r` is split as `q * share + r * share / 100`.
    pub fn split(&self, total: i64) -> (i64, i64) {
        let share = i64::from(self.input_share_percent);
        let input = total / 100 * share + total % 100 * share / 100;
        (input, total - input)
    }
}

impl Default for TokenSplitPolicy {
    fn default() -> Self {
        Self {
            input_share_percent: 70,
        }
    }
}

/// Everything needed to turn a `RawUsageEvent` into a `UsageEvent`
#[derive(Debug, Clone)]
pub struct NormalizationPolicy {
    pub token_split: TokenSplitPolicy,
    pub unattributed_user: String,
    pub default_provider: String,
}

impl NormalizationPolicy {
    pub fn from_config(config: &MeteringConfig) -> MeteringResult<Self> {
        Ok(Self {
            token_split: TokenSplitPolicy::new(config.input_share_percent)?,
            unattributed_user: config.unattributed_user.clone(),
            default_provider: config.default_provider.clone(),
        })
    }

    /// `anthropic/claude-3.5-sonnet` is served by `anthropic`
    pub fn provider_for(&self, model: &str) -> String {
        match model.split_once('/') {
            Some((provider, _)) if !provider.is_empty() => provider.to_string(),
            _ => self.default_provider.clone(),
        }
    }
}

impl Default for NormalizationPolicy {
    fn default() -> Self {
        Self::from_config(&MeteringConfig::default()).unwrap_or(Self {
            token_split: TokenSplitPolicy::default(),
            unattributed_user: "unattributed".to_string(),
            default_provider: "openrouter".to_string(),
        })
    }
}

/// Canonical usage event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub generation_id: String,
    pub client_org_id: String,
    pub user_id: String,
    pub model: String,
    pub provider: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    /// Provider cost in USD, before markup
    pub raw_cost: Decimal,
    pub token_source: TokenSource,
}

impl UsageEvent {
    pub fn total_tokens(&self) -> i64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    pub fn try_from_raw(raw: RawUsageEvent, policy: &NormalizationPolicy) -> MeteringResult<Self> {
        let generation_id = required(raw.generation_id, "generation_id")?;
        let client_org_id = required(raw.client_org_id, "client_org_id")?;
        let model = required(raw.model, "model")?;

        let cost = raw
            .usage
            .ok_or_else(|| MeteringError::invalid(format!("{generation_id}: missing cost")))?;
        if !cost.is_finite() {
            return Err(MeteringError::invalid(format!(
                "{generation_id}: cost {cost} is not a finite number"
            )));
        }
        let raw_cost = decimal_from_f64(cost).ok_or_else(|| {
            MeteringError::invalid(format!("{generation_id}: cost {cost} is out of range"))
        })?;

        let (input_tokens, output_tokens, token_source) =
            match (raw.tokens_prompt, raw.tokens_completion, raw.tokens_used) {
                (None, None, None) => {
                    return Err(MeteringError::invalid(format!(
                        "{generation_id}: no token counts"
                    )));
                }
                (None, None, Some(total)) => {
                    let (input, output) = policy.token_split.split(total);
                    (input, output, TokenSource::Estimated)
                }
                (input, output, _) => (
                    input.unwrap_or(0),
                    output.unwrap_or(0),
                    TokenSource::Explicit,
                ),
            };

        let user_id = raw
            .external_user
            .map(|user| user.trim().to_string())
            .filter(|user| !user.is_empty())
            .unwrap_or_else(|| policy.unattributed_user.clone());
        let provider = policy.provider_for(&model);

        let event = Self {
            generation_id,
            client_org_id,
            user_id,
            model,
            provider,
            input_tokens,
            output_tokens,
            raw_cost,
            token_source,
        };
        event.validate()?;
        Ok(event)
    }

    /// Negative or implausibly large figures are rejected, never clamped
    pub fn validate(&self) -> MeteringResult<()> {
        if self.input_tokens < 0 || self.output_tokens < 0 {
            return Err(MeteringError::invalid(format!(
                "{}: negative token count",
                self.generation_id
            )));
        }
        let total = self.input_tokens.checked_add(self.output_tokens);
        if total.is_none_or(|total| total > MAX_EVENT_TOKENS) {
            return Err(MeteringError::invalid(format!(
                "{}: token count above {} per generation",
                self.generation_id, MAX_EVENT_TOKENS
            )));
        }
        if self.raw_cost.is_sign_negative() && !self.raw_cost.is_zero() {
            return Err(MeteringError::invalid(format!(
                "{}: negative raw cost {}",
                self.generation_id, self.raw_cost
            )));
        }
        Ok(())
    }
}

/// Shortest round-trip text first, so `0.01` stays exactly `0.01`
fn decimal_from_f64(value: f64) -> Option<Decimal> {
    Decimal::from_str(&value.to_string())
        .ok()
        .or_else(|| Decimal::from_f64(value))
}

fn required(value: Option<String>, field: &str) -> MeteringResult<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| MeteringError::invalid(format!("missing {field}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn parse(json: &str) -> MeteringResult<UsageEvent> {
        let raw: RawUsageEvent = serde_json::from_str(json).unwrap();
        UsageEvent::try_from_raw(raw, &NormalizationPolicy::default())
    }

    #[test]
    fn test_explicit_token_fields() {
        let event = parse(
            r#"{"generation_id":"gen-001","client_org_id":"acme","model":"openai/gpt-4o",
                "tokens_prompt":1000,"tokens_completion":500,"usage":0.01,"external_user":"alice"}"#,
        )
        .unwrap();

        assert_eq!(event.input_tokens, 1000);
        assert_eq!(event.output_tokens, 500);
        assert_eq!(event.total_tokens(), 1500);
        assert_eq!(event.raw_cost, dec!(0.01));
        assert_eq!(event.token_source, TokenSource::Explicit);
        assert_eq!(event.provider, "openai");
        assert_eq!(event.user_id, "alice");
    }

    #[test]
    fn test_alternate_field_names() {
        let event = parse(
            r#"{"id":"gen-002","client_id":"acme","model":"mistral-large",
                "prompt_tokens":10,"completion_tokens":5,"cost":0.5,"user_id":"bob"}"#,
        )
        .unwrap();

        assert_eq!(event.generation_id, "gen-002");
        assert_eq!(event.client_org_id, "acme");
        assert_eq!(event.total_tokens(), 15);
        assert_eq!(event.provider, "openrouter");
        assert_eq!(event.user_id, "bob");
    }

    #[test]
    fn test_combined_count_is_split() {
        let event = parse(
            r#"{"generation_id":"gen-003","client_org_id":"acme","model":"x/y",
                "tokens_used":1001,"total_cost":0.02}"#,
        )
        .unwrap();

        assert_eq!(event.input_tokens, 700);
        assert_eq!(event.output_tokens, 301);
        assert_eq!(event.token_source, TokenSource::Estimated);
        assert_eq!(event.user_id, "unattributed");
    }

    #[test]
    fn test_explicit_counts_win_over_combined() {
        let event = parse(
            r#"{"generation_id":"gen-004","client_org_id":"acme","model":"x/y",
                "tokens_prompt":40,"tokens_used":1000,"usage":0.0}"#,
        )
        .unwrap();

        assert_eq!(event.input_tokens, 40);
        assert_eq!(event.output_tokens, 0);
        assert_eq!(event.token_source, TokenSource::Explicit);
    }

    #[test]
    fn test_rejects_incomplete_or_negative_events() {
        // no tokens
        assert!(parse(r#"{"generation_id":"g","client_org_id":"acme","model":"m","usage":0.1}"#).is_err());
        // no cost
        assert!(parse(r#"{"generation_id":"g","client_org_id":"acme","model":"m","tokens_used":3}"#).is_err());
        // no id
        assert!(parse(r#"{"client_org_id":"acme","model":"m","tokens_used":3,"usage":0.1}"#).is_err());
        // blank client
        assert!(parse(r#"{"generation_id":"g","client_org_id":" ","model":"m","tokens_used":3,"usage":0.1}"#).is_err());

        let err = parse(
            r#"{"generation_id":"g","client_org_id":"acme","model":"m","tokens_used":3,"usage":-0.1}"#,
        )
        .unwrap_err();
        assert!(matches!(err, MeteringError::InvalidInput(_)));

        let err = parse(
            r#"{"generation_id":"g","client_org_id":"acme","model":"m","tokens_prompt":-3,"usage":0.1}"#,
        )
        .unwrap_err();
        assert!(matches!(err, MeteringError::InvalidInput(_)));
    }

    #[test]
    fn test_non_finite_cost_is_rejected() {
        let raw = RawUsageEvent {
            generation_id: Some("g".to_string()),
            client_org_id: Some("acme".to_string()),
            model: Some("m".to_string()),
            tokens_used: Some(10),
            usage: Some(f64::NAN),
            ..Default::default()
        };
        let err = UsageEvent::try_from_raw(raw, &NormalizationPolicy::default()).unwrap_err();
        assert!(matches!(err, MeteringError::InvalidInput(_)));
    }

    #[test]
    fn test_split_policy() {
        let policy = TokenSplitPolicy::new(60).unwrap();
        assert_eq!(policy.split(10), (6, 4));
        assert_eq!(policy.split(0), (0, 0));
        assert_eq!(TokenSplitPolicy::default().split(3), (2, 1));
        assert!(TokenSplitPolicy::new(101).is_err());
    }

    #[test]
    fn test_split_of_huge_totals_does_not_overflow() {
        let policy = TokenSplitPolicy::default();
        assert_eq!(
            policy.split(200_000_000_000_000_000),
            (140_000_000_000_000_000, 60_000_000_000_000_000)
        );
        let (input, output) = policy.split(i64::MAX);
        assert_eq!(input + output, i64::MAX);
        assert_eq!(TokenSplitPolicy::new(100).unwrap().split(i64::MAX), (i64::MAX, 0));
    }

    #[test]
    fn test_oversized_token_counts_are_rejected() {
        let err = parse(
            r#"{"generation_id":"big","client_org_id":"acme","model":"m",
                "tokens_used":200000000000000000,"usage":0.01}"#,
        )
        .unwrap_err();
        assert!(matches!(err, MeteringError::InvalidInput(_)));

        let err = parse(&format!(
            r#"{{"generation_id":"wrap","client_org_id":"acme","model":"m",
                "tokens_prompt":{},"tokens_completion":1,"usage":0.01}}"#,
            i64::MAX
        ))
        .unwrap_err();
        assert!(matches!(err, MeteringError::InvalidInput(_)));

        let at_limit = parse(&format!(
            r#"{{"generation_id":"edge","client_org_id":"acme","model":"m",
                "tokens_used":{MAX_EVENT_TOKENS},"usage":0.01}}"#
        ))
        .unwrap();
        assert_eq!(at_limit.total_tokens(), MAX_EVENT_TOKENS);
    }
}
