use std::fmt;

use serde::{Deserialize, Serialize};

/// Reservation class. Each tier carries its own price, global supply cap and
/// per-user cap; signatures are unique across all tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    Normie,
    Sigma,
    Chad,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Normie, Tier::Sigma, Tier::Chad];

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Normie => "NORMIE",
            Tier::Sigma => "SIGMA",
            Tier::Chad => "CHAD",
        }
    }

    /// Case-insensitive parse of the wire/tier name.
    pub fn parse(raw: &str) -> Option<Tier> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "NORMIE" => Some(Tier::Normie),
            "SIGMA" => Some(Tier::Sigma),
            "CHAD" => Some(Tier::Chad),
            _ => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TierPolicy {
    pub price_usd: f64,
    pub supply_cap: u32,
    pub per_user_cap: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TierBook {
    pub normie: TierPolicy,
    pub sigma: TierPolicy,
    pub chad: TierPolicy,
}

impl TierBook {
    pub fn policy(&self, tier: Tier) -> TierPolicy {
        match tier {
            Tier::Normie => self.normie,
            Tier::Sigma => self.sigma,
            Tier::Chad => self.chad,
        }
    }
}
