use std::env;

use anyhow::{anyhow, Context, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use wishgate::admission::AdmissionController;
use wishgate::config::load_config;
use wishgate::tier::Tier;

/// Operator tool: dry-run a submitted payment signature against chain
/// state without committing a reservation.
#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .init();

    let mut args = env::args().skip(1);
    let config_path = args.next().ok_or_else(usage)?;
    let signature = args.next().ok_or_else(usage)?;
    let tier_raw = args.next().ok_or_else(usage)?;
    let tier = Tier::parse(&tier_raw)
        .ok_or_else(|| anyhow!("unknown tier {tier_raw}; expected NORMIE, SIGMA or CHAD"))?;

    let cfg = load_config(&config_path)?;
    let claimed_usd = match args.next() {
        Some(raw) => raw
            .parse::<f64>()
            .context("claimed USD amount must be a number")?,
        None => cfg.tiers.policy(tier).price_usd,
    };

    info!(
        config = %config_path,
        tier = %tier,
        claimed_usd,
        receiving_wallet = %cfg.solana.receiving_wallet,
        "wishgate dry-run verifier started"
    );

    let controller = AdmissionController::from_config(&cfg)?;
    match controller.dry_run(tier, &signature, claimed_usd).await {
        Ok(verification) => {
            info!(
                payer = %verification.payer_wallet,
                paid_sol = verification.paid_sol,
                paid_usd = verification.paid_usd,
                confirmed_at = verification.confirmed_at_unix,
                "transaction would be admitted"
            );
            println!("{}", serde_json::to_string_pretty(&verification)?);
            Ok(())
        }
        Err(err) => {
            error!(
                code = err.code(),
                retryable = err.is_retryable(),
                error = %err,
                "transaction would be rejected"
            );
            Err(anyhow::Error::new(err))
        }
    }
}

fn usage() -> anyhow::Error {
    anyhow!("usage: wishgate <config.toml> <signature> <tier> [claimed-usd]")
}
