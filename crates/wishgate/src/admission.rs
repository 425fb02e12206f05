use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{RewardsConfig, WishgateConfig};
use crate::error::AdmissionError;
use crate::ledger::{
    CommitError, CommitRequest, MemoryLedger, ReservationOrigin, ReservationRecord, TierSupply,
};
use crate::tier::{Tier, TierBook};
use crate::verify::{is_well_formed_signature, ChainVerifier, Verification, VerifyError};

/// Display-only payment estimate for a tier, using the fallback-tolerant
/// price path. The verifier re-fetches the strict price at admission time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QuoteEstimate {
    pub tier: Tier,
    pub price_usd: f64,
    pub usd_per_sol: f64,
    pub estimated_sol: f64,
}

/// Orchestrates a reservation request: input shape, replay and cap
/// pre-checks, independent chain verification, then the atomic ledger
/// commit. All dependencies are passed in explicitly, so the whole
/// pipeline runs against fakes in tests.
pub struct AdmissionController {
    ledger: MemoryLedger,
    verifier: ChainVerifier,
    tiers: TierBook,
    rewards: RewardsConfig,
}

impl AdmissionController {
    pub fn new(
        ledger: MemoryLedger,
        verifier: ChainVerifier,
        tiers: TierBook,
        rewards: RewardsConfig,
    ) -> Self {
        Self {
            ledger,
            verifier,
            tiers,
            rewards,
        }
    }

    pub fn from_config(cfg: &WishgateConfig) -> Result<Self> {
        Ok(Self::new(
            MemoryLedger::new(),
            ChainVerifier::from_config(cfg)?,
            cfg.tiers,
            cfg.rewards.clone(),
        ))
    }

    pub fn ledger(&self) -> &MemoryLedger {
        &self.ledger
    }

    /// Admit one reservation. Steps short-circuit in order so requests
    /// doomed on local state never cost a chain RPC call; the commit at the
    /// end re-validates everything atomically, closing the race between
    /// concurrent requests.
    pub async fn reserve(
        &self,
        user_id: &str,
        tier: Tier,
        signature: &str,
        claimed_usd: f64,
    ) -> Result<ReservationRecord, AdmissionError> {
        self.validate_request(user_id, tier, signature, claimed_usd)?;

        if let Some(existing) = self.ledger.find(signature).await {
            debug!(signature, user_id, "replayed signature rejected before verification");
            return Err(AdmissionError::DuplicateSignature {
                existing: Box::new(existing),
            });
        }

        let policy = self.tiers.policy(tier);
        if self.ledger.count_by_tier(tier).await >= policy.supply_cap {
            return Err(AdmissionError::TierSoldOut(tier));
        }
        if self.ledger.count_by_user_and_tier(user_id, tier).await >= policy.per_user_cap {
            return Err(AdmissionError::UserTierLimitReached(tier));
        }

        let verification = self
            .verifier
            .verify(signature, claimed_usd)
            .await
            .map_err(map_verify_error)?;

        // Persist only verifier-derived facts; the request body contributed
        // nothing past this point.
        let record = self
            .ledger
            .commit(
                CommitRequest {
                    signature: signature.to_string(),
                    user_id: user_id.to_string(),
                    tier,
                    payer_wallet: Some(verification.payer_wallet),
                    paid_sol: verification.paid_sol,
                    price_usd: policy.price_usd,
                    origin: ReservationOrigin::ChainPayment,
                },
                &policy,
            )
            .await
            .map_err(map_commit_error)?;

        info!(
            signature = %record.signature,
            user_id,
            tier = %tier,
            paid_sol = record.paid_sol,
            "reservation admitted"
        );
        Ok(record)
    }

    /// Verification without commit, for pre-flight UX. Also reports a
    /// replay: claiming an already-spent signature "would be admitted"
    /// would mislead.
    pub async fn dry_run(
        &self,
        tier: Tier,
        signature: &str,
        claimed_usd: f64,
    ) -> Result<Verification, AdmissionError> {
        if !claimed_usd.is_finite() || claimed_usd <= 0.0 {
            return Err(AdmissionError::InvalidInput(
                "claimed USD amount must be positive".to_string(),
            ));
        }
        if let Some(existing) = self.ledger.find(signature).await {
            return Err(AdmissionError::DuplicateSignature {
                existing: Box::new(existing),
            });
        }
        debug!(signature, tier = %tier, claimed_usd, "dry-run verification");
        self.verifier
            .verify(signature, claimed_usd)
            .await
            .map_err(map_verify_error)
    }

    /// Free reservation for an invite milestone. Bypasses payment
    /// verification and the per-user cap, still consumes global supply,
    /// and is idempotent per (user, milestone) via a synthetic ledger key.
    pub async fn grant_milestone(
        &self,
        user_id: &str,
        milestone: u32,
    ) -> Result<ReservationRecord, AdmissionError> {
        if user_id.trim().is_empty() {
            return Err(AdmissionError::InvalidInput(
                "user id must not be empty".to_string(),
            ));
        }
        let tier = self.rewards.milestone_grant_tier;
        let key = grant_key(user_id, milestone);
        if let Some(existing) = self.ledger.find(&key).await {
            return Ok(existing);
        }
        let policy = self.tiers.policy(tier);
        match self
            .ledger
            .commit(
                CommitRequest {
                    signature: key,
                    user_id: user_id.to_string(),
                    tier,
                    payer_wallet: None,
                    paid_sol: 0.0,
                    price_usd: 0.0,
                    origin: ReservationOrigin::InviteMilestone { milestone },
                },
                &policy,
            )
            .await
        {
            Ok(record) => {
                info!(user_id, milestone, tier = %tier, "invite milestone grant admitted");
                Ok(record)
            }
            // Lost a race with an identical grant; same outcome either way.
            Err(CommitError::SignatureExists(existing)) => Ok(*existing),
            Err(other) => Err(map_commit_error(other)),
        }
    }

    pub async fn supply(&self) -> Vec<TierSupply> {
        self.ledger.supply(&self.tiers).await
    }

    pub async fn reservations_for(&self, user_id: &str) -> Vec<ReservationRecord> {
        self.ledger.list_by_user(user_id).await
    }

    pub async fn quote(&self, tier: Tier) -> QuoteEstimate {
        let policy = self.tiers.policy(tier);
        let usd_per_sol = self.verifier.estimate_usd_per_sol().await;
        QuoteEstimate {
            tier,
            price_usd: policy.price_usd,
            usd_per_sol,
            estimated_sol: policy.price_usd / usd_per_sol,
        }
    }

    fn validate_request(
        &self,
        user_id: &str,
        tier: Tier,
        signature: &str,
        claimed_usd: f64,
    ) -> Result<(), AdmissionError> {
        if user_id.trim().is_empty() {
            return Err(AdmissionError::InvalidInput(
                "user id must not be empty".to_string(),
            ));
        }
        if !claimed_usd.is_finite() || claimed_usd <= 0.0 {
            return Err(AdmissionError::InvalidInput(
                "claimed USD amount must be positive".to_string(),
            ));
        }
        let policy = self.tiers.policy(tier);
        if (claimed_usd - policy.price_usd).abs() > f64::EPSILON {
            return Err(AdmissionError::InvalidInput(format!(
                "claimed amount ${claimed_usd} does not match the {tier} price ${}",
                policy.price_usd
            )));
        }
        if !is_well_formed_signature(signature) {
            return Err(AdmissionError::InvalidInput(
                "transaction signature is not well-formed base58".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn grant_key(user_id: &str, milestone: u32) -> String {
    format!("invite-grant:{user_id}:{milestone}")
}

fn map_verify_error(err: VerifyError) -> AdmissionError {
    match err {
        VerifyError::Rejected(reason) => AdmissionError::VerificationFailed(reason),
        VerifyError::Price(err) => AdmissionError::PriceUnavailable(err),
        VerifyError::Infra(err) => AdmissionError::Infrastructure(err),
    }
}

fn map_commit_error(err: CommitError) -> AdmissionError {
    match err {
        CommitError::SignatureExists(existing) => AdmissionError::DuplicateSignature { existing },
        CommitError::TierSoldOut(tier) => AdmissionError::TierSoldOut(tier),
        CommitError::UserCapReached(tier) => AdmissionError::UserTierLimitReached(tier),
    }
}
