use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::clock::now_unix_millis;
use crate::config::RewardsConfig;

pub const REFERRAL_CODE_LEN: usize = 6;
const REFERRAL_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Promo-site user. `invited_by` is recorded once at creation and never
/// changes; points only ever grow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub email: String,
    pub display_name: String,
    pub referral_code: String,
    pub invited_by: Option<String>,
    pub points: u64,
    pub invite_count: u32,
    /// Reward multiplier applied to task points. 1 for everyone unless an
    /// operator raises it.
    pub multiplier: u64,
    pub created_at_unix_ms: u64,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub user_id: String,
    pub email: String,
    pub invite_code: Option<String>,
}

/// The referrer just hit an invite-count milestone; the caller routes this
/// into [`crate::admission::AdmissionController::grant_milestone`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MilestoneCrossing {
    pub user_id: String,
    pub invites: u32,
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub profile: UserProfile,
    pub crossed_milestone: Option<MilestoneCrossing>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AccountError {
    #[error("user already exists")]
    AlreadyRegistered,
    #[error("unknown user")]
    UnknownUser,
    #[error("invite code {0} does not exist")]
    UnknownInviteCode(String),
}

#[derive(Debug, Default)]
struct DirectoryState {
    by_id: HashMap<String, UserProfile>,
    /// referral code -> owning user id; codes are globally unique
    by_code: HashMap<String, String>,
}

/// In-memory user directory with the same single-critical-section rule as
/// the reservation ledger: registration, invite crediting and code
/// uniqueness all happen under one lock.
#[derive(Debug, Clone)]
pub struct AccountService {
    state: Arc<Mutex<DirectoryState>>,
    rewards: RewardsConfig,
}

impl AccountService {
    pub fn new(rewards: RewardsConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(DirectoryState::default())),
            rewards,
        }
    }

    /// Create the user on first sign-in. An invite code is normalized,
    /// resolved to its owner and credited (+1 invite, fixed point bonus);
    /// crossing a configured milestone is reported back to the caller.
    pub async fn register(&self, new_user: NewUser) -> Result<Registration, AccountError> {
        let mut state = self.state.lock().await;

        if state.by_id.contains_key(&new_user.user_id) {
            return Err(AccountError::AlreadyRegistered);
        }

        let invited_by = new_user
            .invite_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(|code| code.to_ascii_uppercase());

        let referrer_id = match &invited_by {
            Some(code) => match state.by_code.get(code) {
                Some(owner) => Some(owner.clone()),
                None => return Err(AccountError::UnknownInviteCode(code.clone())),
            },
            None => None,
        };

        let referral_code = generate_unique_code(&state.by_code);
        let profile = UserProfile {
            user_id: new_user.user_id.clone(),
            display_name: new_user
                .email
                .split('@')
                .next()
                .unwrap_or_default()
                .to_string(),
            email: new_user.email,
            referral_code: referral_code.clone(),
            invited_by,
            points: 0,
            invite_count: 0,
            multiplier: 1,
            created_at_unix_ms: now_unix_millis(),
        };
        state.by_code.insert(referral_code, new_user.user_id.clone());
        state.by_id.insert(new_user.user_id, profile.clone());

        let mut crossed_milestone = None;
        if let Some(referrer_id) = referrer_id {
            if let Some(referrer) = state.by_id.get_mut(&referrer_id) {
                referrer.invite_count += 1;
                referrer.points += self.rewards.invite_bonus_points;
                info!(
                    referrer = %referrer_id,
                    invite_count = referrer.invite_count,
                    "invite credited"
                );
                if self.rewards.invite_milestones.contains(&referrer.invite_count) {
                    crossed_milestone = Some(MilestoneCrossing {
                        user_id: referrer_id,
                        invites: referrer.invite_count,
                    });
                }
            }
        }

        Ok(Registration {
            profile,
            crossed_milestone,
        })
    }

    pub async fn get(&self, user_id: &str) -> Option<UserProfile> {
        self.state.lock().await.by_id.get(user_id).cloned()
    }

    pub async fn find_by_code(&self, code: &str) -> Option<UserProfile> {
        let state = self.state.lock().await;
        state
            .by_code
            .get(&code.trim().to_ascii_uppercase())
            .and_then(|user_id| state.by_id.get(user_id))
            .cloned()
    }

    /// Credit `base_points` scaled by the profile's multiplier; returns the
    /// amount actually credited.
    pub async fn award_points(&self, user_id: &str, base_points: u64) -> Result<u64, AccountError> {
        let mut state = self.state.lock().await;
        let profile = state
            .by_id
            .get_mut(user_id)
            .ok_or(AccountError::UnknownUser)?;
        let credited = base_points * profile.multiplier;
        profile.points += credited;
        Ok(credited)
    }

    pub async fn set_multiplier(&self, user_id: &str, multiplier: u64) -> Result<(), AccountError> {
        let mut state = self.state.lock().await;
        let profile = state
            .by_id
            .get_mut(user_id)
            .ok_or(AccountError::UnknownUser)?;
        profile.multiplier = multiplier.max(1);
        Ok(())
    }
}

fn generate_unique_code(existing: &HashMap<String, String>) -> String {
    let mut rng = rand::thread_rng();
    loop {
        let code: String = (0..REFERRAL_CODE_LEN)
            .map(|_| REFERRAL_ALPHABET[rng.gen_range(0..REFERRAL_ALPHABET.len())] as char)
            .collect();
        if !existing.contains_key(&code) {
            return code;
        }
    }
}
