use super::print_json;
use crate::engine::MeteringEngine;
use crate::error::MeteringError;
use crate::metering::{BatchResult, IngestReport, RawUsageEvent, UsageEvent, batch_cost};
use clap::Args;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Args)]
pub struct IngestArgs {
    /// JSON array of events, or one JSON event per line
    file: PathBuf,
    /// Cost the events without recording anything
    #[arg(long)]
    dry_run: bool,
}

/// Payloads that parsed, plus one error per line that did not
struct ParsedEvents {
    events: Vec<RawUsageEvent>,
    errors: Vec<MeteringError>,
}

fn parse_events(content: &str) -> Result<ParsedEvents, serde_json::Error> {
    if content.trim_start().starts_with('[') {
        return Ok(ParsedEvents {
            events: serde_json::from_str(content)?,
            errors: Vec::new(),
        });
    }

    let mut parsed = ParsedEvents {
        events: Vec::new(),
        errors: Vec::new(),
    };
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<RawUsageEvent>(line) {
            Ok(event) => parsed.events.push(event),
            Err(e) => parsed
                .errors
                .push(MeteringError::invalid(format!("line {}: {e}", index + 1))),
        }
    }
    Ok(parsed)
}

pub async fn handle_ingest_command(
    args: IngestArgs,
    engine: &MeteringEngine,
) -> Result<(), Box<dyn std::error::Error>> {
    let content = tokio::fs::read_to_string(&args.file).await?;
    let parsed = parse_events(&content)?;
    info!(
        file = %args.file.display(),
        events = parsed.events.len(),
        unparseable = parsed.errors.len(),
        dry_run = args.dry_run,
        "Loaded usage events"
    );

    if args.dry_run {
        return print_json(&dry_run(engine, parsed).await);
    }

    let mut report = engine.recorder.record_raw_batch(parsed.events).await;
    for err in &parsed.errors {
        report.skip(None, err);
    }
    print_json(&report)
}

/// Per-client cost preview with no writes
async fn dry_run(engine: &MeteringEngine, parsed: ParsedEvents) -> DryRunReport {
    let mut report = DryRunReport::default();
    for err in &parsed.errors {
        report.rejected.skip(None, err);
    }

    let mut by_client: BTreeMap<String, Vec<UsageEvent>> = BTreeMap::new();
    for raw in parsed.events {
        let generation_id = raw.generation_id.clone();
        match engine.recorder.normalize(raw) {
            Ok(event) => by_client
                .entry(event.client_org_id.clone())
                .or_default()
                .push(event),
            Err(e) => report.rejected.skip(generation_id, &e),
        }
    }

    for (client_org_id, events) in by_client {
        match engine.recorder.client_context(&client_org_id).await {
            Ok(client) => {
                report
                    .clients
                    .insert(client_org_id, batch_cost(&events, &client));
            }
            Err(e) => {
                warn!(%client_org_id, "Cannot cost events for client: {}", e);
                for event in events {
                    report.rejected.skip(Some(event.generation_id), &e);
                }
            }
        }
    }
    report
}

#[derive(Debug, Default, serde::Serialize)]
struct DryRunReport {
    clients: BTreeMap<String, BatchResult>,
    rejected: IngestReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_array() {
        let parsed = parse_events(
            r#"[
                {"id": "gen-1", "client_id": "acme", "model": "openai/gpt-4o", "prompt_tokens": 10, "completion_tokens": 5, "cost": 0.01},
                {"generation_id": "gen-2", "client_org_id": "acme", "model": "gpt-4o", "tokens_used": 100, "usage": 0.02}
            ]"#,
        )
        .unwrap();

        assert_eq!(parsed.events.len(), 2);
        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.events[0].generation_id.as_deref(), Some("gen-1"));
        assert_eq!(parsed.events[1].tokens_used, Some(100));
    }

    #[test]
    fn test_parse_json_lines_keeps_good_lines() {
        let content = concat!(
            r#"{"id": "gen-1", "client_id": "acme", "model": "m", "total_tokens": 10, "cost": 0.1}"#,
            "\n\n",
            "not json\n",
            r#"{"id": "gen-3", "client_id": "acme", "model": "m", "total_tokens": 30, "cost": 0.3}"#,
            "\n"
        );

        let parsed = parse_events(content).unwrap();
        assert_eq!(parsed.events.len(), 2);
        assert_eq!(parsed.errors.len(), 1);
        assert!(parsed.errors[0].to_string().contains("line 3"));
    }

    #[test]
    fn test_parse_malformed_array_fails() {
        assert!(parse_events("[{\"id\": ").is_err());
    }
}
