use crate::ledger::ReservationRecord;
use crate::price::PriceError;
use crate::tier::Tier;

/// Why the chain verifier refused a transaction. These are expected
/// outcomes, returned as values; only transport faults become errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RejectReason {
    #[error("transaction hash is not a well-formed base58 signature")]
    InvalidFormat,
    #[error("transaction not found on chain; wait for confirmation and retry")]
    NotFound,
    #[error("transaction is {age_secs}s old; must be within {max_secs}s")]
    Expired { age_secs: i64, max_secs: i64 },
    #[error("transaction failed on chain")]
    ChainFailure,
    #[error("receiving wallet is not part of the transaction")]
    WrongRecipient,
    #[error("incorrect amount: expected {expected_sol:.4} SOL, got {actual_sol:.4} SOL")]
    AmountMismatch { expected_sol: f64, actual_sol: f64 },
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::InvalidFormat => "invalid_format",
            RejectReason::NotFound => "tx_not_found",
            RejectReason::Expired { .. } => "tx_expired",
            RejectReason::ChainFailure => "tx_failed",
            RejectReason::WrongRecipient => "wrong_recipient",
            RejectReason::AmountMismatch { .. } => "amount_mismatch",
        }
    }

    /// Only a not-yet-visible transaction is worth a client retry; every
    /// other rejection is permanent for that signature.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RejectReason::NotFound)
    }
}

/// Outcome taxonomy of the admission pipeline. Business rejections carry
/// enough context for a user-facing message; `code()` is the stable
/// machine-readable identifier for the web layer.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("invalid reservation request: {0}")]
    InvalidInput(String),
    /// The signature already backs a reservation. Carries the original
    /// record so a retry of a committed request resolves to the same
    /// identity instead of an ambiguous failure.
    #[error("transaction signature was already used for a reservation")]
    DuplicateSignature { existing: Box<ReservationRecord> },
    #[error("{0} tier is sold out")]
    TierSoldOut(Tier),
    #[error("per-user limit reached for the {0} tier")]
    UserTierLimitReached(Tier),
    #[error("payment verification failed: {0}")]
    VerificationFailed(RejectReason),
    #[error("SOL price feed unavailable")]
    PriceUnavailable(#[source] PriceError),
    #[error("infrastructure failure: {0}")]
    Infrastructure(anyhow::Error),
}

impl AdmissionError {
    pub fn code(&self) -> &'static str {
        match self {
            AdmissionError::InvalidInput(_) => "invalid_input",
            AdmissionError::DuplicateSignature { .. } => "duplicate_signature",
            AdmissionError::TierSoldOut(_) => "tier_sold_out",
            AdmissionError::UserTierLimitReached(_) => "user_tier_limit",
            AdmissionError::VerificationFailed(reason) => reason.code(),
            AdmissionError::PriceUnavailable(_) => "price_unavailable",
            AdmissionError::Infrastructure(_) => "infrastructure",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            AdmissionError::VerificationFailed(reason) => reason.is_retryable(),
            AdmissionError::PriceUnavailable(_) | AdmissionError::Infrastructure(_) => true,
            _ => false,
        }
    }
}
