use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::clock::now_unix_millis;
use crate::tier::{Tier, TierBook, TierPolicy};

/// How a reservation came to exist: a verified on-chain payment, or an
/// internal invite-milestone grant that never touched the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationOrigin {
    ChainPayment,
    InviteMilestone { milestone: u32 },
}

/// Append-only reservation row, keyed by its transaction signature (or
/// synthetic grant key). Never updated or deleted after commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationRecord {
    pub signature: String,
    pub user_id: String,
    pub tier: Tier,
    pub payer_wallet: Option<String>,
    pub paid_sol: f64,
    pub price_usd: f64,
    pub verified: bool,
    pub origin: ReservationOrigin,
    pub created_at_unix_ms: u64,
}

#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub signature: String,
    pub user_id: String,
    pub tier: Tier,
    pub payer_wallet: Option<String>,
    pub paid_sol: f64,
    pub price_usd: f64,
    pub origin: ReservationOrigin,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CommitError {
    #[error("signature already backs a reservation")]
    SignatureExists(Box<ReservationRecord>),
    #[error("{0} tier supply exhausted")]
    TierSoldOut(Tier),
    #[error("per-user limit for {0} reached")]
    UserCapReached(Tier),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierSupply {
    pub tier: Tier,
    pub sold: u32,
    pub remaining: u32,
}

#[derive(Debug, Default)]
struct LedgerState {
    by_signature: HashMap<String, ReservationRecord>,
    /// Commit order, for creation-ordered listings.
    order: Vec<String>,
    tier_counts: HashMap<Tier, u32>,
    user_index: HashMap<String, Vec<String>>,
}

impl LedgerState {
    fn held_by_user(&self, user_id: &str, tier: Tier) -> u32 {
        self.user_index
            .get(user_id)
            .map(|signatures| {
                signatures
                    .iter()
                    .filter_map(|sig| self.by_signature.get(sig))
                    .filter(|record| record.tier == tier)
                    .count() as u32
            })
            .unwrap_or(0)
    }
}

/// In-memory reservation ledger. One mutex guards the signature map, the
/// tier counters and the per-user index, so a commit observes and mutates
/// all of them in a single critical section; two racers for the last
/// supply slot resolve to exactly one success.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_signature_used(&self, signature: &str) -> bool {
        self.state.lock().await.by_signature.contains_key(signature)
    }

    pub async fn find(&self, signature: &str) -> Option<ReservationRecord> {
        self.state.lock().await.by_signature.get(signature).cloned()
    }

    pub async fn count_by_tier(&self, tier: Tier) -> u32 {
        self.state
            .lock()
            .await
            .tier_counts
            .get(&tier)
            .copied()
            .unwrap_or(0)
    }

    pub async fn count_by_user_and_tier(&self, user_id: &str, tier: Tier) -> u32 {
        self.state.lock().await.held_by_user(user_id, tier)
    }

    /// The authoritative check-and-set. Re-validates signature uniqueness,
    /// the global supply cap and the per-user cap under the lock; the
    /// controller's pre-checks are advisory only. Milestone grants skip the
    /// per-user cap but still consume global supply.
    pub async fn commit(
        &self,
        request: CommitRequest,
        policy: &TierPolicy,
    ) -> Result<ReservationRecord, CommitError> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state.by_signature.get(&request.signature) {
            return Err(CommitError::SignatureExists(Box::new(existing.clone())));
        }

        let sold = state.tier_counts.get(&request.tier).copied().unwrap_or(0);
        if sold >= policy.supply_cap {
            return Err(CommitError::TierSoldOut(request.tier));
        }

        if request.origin == ReservationOrigin::ChainPayment
            && state.held_by_user(&request.user_id, request.tier) >= policy.per_user_cap
        {
            return Err(CommitError::UserCapReached(request.tier));
        }

        let record = ReservationRecord {
            signature: request.signature.clone(),
            user_id: request.user_id.clone(),
            tier: request.tier,
            payer_wallet: request.payer_wallet,
            paid_sol: request.paid_sol,
            price_usd: request.price_usd,
            verified: request.origin == ReservationOrigin::ChainPayment,
            origin: request.origin,
            created_at_unix_ms: now_unix_millis(),
        };

        state
            .by_signature
            .insert(request.signature.clone(), record.clone());
        state.order.push(request.signature.clone());
        *state.tier_counts.entry(request.tier).or_insert(0) += 1;
        state
            .user_index
            .entry(request.user_id)
            .or_default()
            .push(request.signature);

        Ok(record)
    }

    /// The user's reservations in creation order.
    pub async fn list_by_user(&self, user_id: &str) -> Vec<ReservationRecord> {
        let state = self.state.lock().await;
        state
            .user_index
            .get(user_id)
            .map(|signatures| {
                signatures
                    .iter()
                    .filter_map(|sig| state.by_signature.get(sig).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every reservation in creation order, for administrative views.
    pub async fn list_all(&self) -> Vec<ReservationRecord> {
        let state = self.state.lock().await;
        state
            .order
            .iter()
            .filter_map(|sig| state.by_signature.get(sig).cloned())
            .collect()
    }

    pub async fn supply(&self, book: &TierBook) -> Vec<TierSupply> {
        let state = self.state.lock().await;
        Tier::ALL
            .into_iter()
            .map(|tier| {
                let sold = state.tier_counts.get(&tier).copied().unwrap_or(0);
                TierSupply {
                    tier,
                    sold,
                    remaining: book.policy(tier).supply_cap.saturating_sub(sold),
                }
            })
            .collect()
    }
}
