use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use solana_sdk::commitment_config::CommitmentConfig;

use crate::tier::{Tier, TierBook};

#[derive(Debug, Clone, Deserialize)]
pub struct WishgateConfig {
    pub solana: SolanaConfig,
    pub oracle: OracleConfig,
    pub verification: VerificationConfig,
    pub tiers: TierBook,
    pub rewards: RewardsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SolanaConfig {
    pub rpc_url: String,
    pub commitment: Option<String>,
    /// Project wallet every manual payment must land on.
    pub receiving_wallet: String,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    pub price_url: String,
    pub request_timeout_ms: u64,
    /// Display-only estimate when the feed is down; never used for admission.
    pub fallback_price_usd: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerificationConfig {
    /// Allowed deviation between expected and on-chain amount, in basis points.
    pub tolerance_bps: u64,
    pub max_transaction_age_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RewardsConfig {
    pub invite_bonus_points: u64,
    /// Invite counts at which the referrer earns a free reservation.
    pub invite_milestones: Vec<u32>,
    pub milestone_grant_tier: Tier,
}

pub fn load_config(path: impl AsRef<Path>) -> Result<WishgateConfig> {
    let path_ref = path.as_ref();
    let raw = fs::read_to_string(path_ref)
        .with_context(|| format!("failed to read config file {}", path_ref.display()))?;
    toml::from_str(&raw).with_context(|| format!("invalid config TOML in {}", path_ref.display()))
}

pub fn parse_commitment(v: Option<&str>) -> CommitmentConfig {
    match v.unwrap_or("confirmed").to_ascii_lowercase().as_str() {
        "processed" => CommitmentConfig::processed(),
        "finalized" => CommitmentConfig::finalized(),
        _ => CommitmentConfig::confirmed(),
    }
}
