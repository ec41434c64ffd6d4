use super::print_json;
use crate::engine::MeteringEngine;
use crate::metering::DateRange;
use chrono::NaiveDate;
use clap::{Args, Subcommand};

#[derive(Args)]
pub struct RangeArgs {
    #[arg(long)]
    client: String,
    /// First day, YYYY-MM-DD; defaults to the first of the current month
    #[arg(long)]
    start: Option<NaiveDate>,
    /// Last day, YYYY-MM-DD; defaults to today
    #[arg(long)]
    end: Option<NaiveDate>,
}

#[derive(Subcommand)]
pub enum StatsReport {
    /// Month-to-date totals including today's live counter
    MonthToDate {
        #[arg(long)]
        client: String,
    },
    /// Totals for a date range
    Range(RangeArgs),
    /// One row per day
    Daily(RangeArgs),
    /// Usage per user
    Users(RangeArgs),
    /// Usage per model
    Models(RangeArgs),
    /// Month-to-date spend against the monthly limit
    Budget {
        #[arg(long)]
        client: String,
    },
    /// Totals for every active client
    Overview {
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
    },
}

fn resolve_range(
    engine: &MeteringEngine,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<DateRange, Box<dyn std::error::Error>> {
    let default = DateRange::month_to_date(engine.clock.today());
    Ok(DateRange::new(
        start.unwrap_or(default.start),
        end.unwrap_or(default.end),
    )?)
}

pub async fn handle_stats_command(
    report: StatsReport,
    engine: &MeteringEngine,
) -> Result<(), Box<dyn std::error::Error>> {
    let query = &engine.query;

    match report {
        StatsReport::MonthToDate { client } => print_json(&query.month_to_date(&client).await?),
        StatsReport::Range(args) => {
            let range = resolve_range(engine, args.start, args.end)?;
            print_json(&query.totals_for_range(&args.client, range).await?)
        }
        StatsReport::Daily(args) => {
            let range = resolve_range(engine, args.start, args.end)?;
            print_json(&query.daily_breakdown(&args.client, range).await?)
        }
        StatsReport::Users(args) => {
            let range = resolve_range(engine, args.start, args.end)?;
            print_json(&query.by_user(&args.client, range).await?)
        }
        StatsReport::Models(args) => {
            let range = resolve_range(engine, args.start, args.end)?;
            print_json(&query.by_model(&args.client, range).await?)
        }
        StatsReport::Budget { client } => print_json(&query.budget_status(&client).await?),
        StatsReport::Overview { start, end } => {
            let range = resolve_range(engine, start, end)?;
            print_json(&query.billing_overview(range).await?)
        }
    }
}
