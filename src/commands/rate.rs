use super::print_json;
use crate::engine::MeteringEngine;
use clap::Args;
use rust_decimal::Decimal;
use std::str::FromStr;

#[derive(Args)]
pub struct RateArgs {
    #[arg(long, default_value = "USD")]
    from: String,
    #[arg(long, default_value = "PLN")]
    to: String,
    /// Convert this amount instead of printing the bare rate
    #[arg(long)]
    amount: Option<String>,
}

pub async fn handle_rate_command(
    args: RateArgs,
    engine: &MeteringEngine,
) -> Result<(), Box<dyn std::error::Error>> {
    match args.amount {
        Some(amount) => {
            let amount = Decimal::from_str(amount.trim())?;
            print_json(&engine.exchange.convert(amount, &args.from, &args.to).await?)
        }
        None => print_json(&engine.exchange.current_rate(&args.from, &args.to).await?),
    }
}
