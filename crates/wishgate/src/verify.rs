use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use solana_client::client_error::ClientError;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_sdk::native_token::LAMPORTS_PER_SOL;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_transaction_status::{
    EncodedConfirmedTransactionWithStatusMeta, EncodedTransaction, UiMessage, UiTransactionEncoding,
};
use tracing::debug;

use crate::clock::now_unix_secs;
use crate::config::{parse_commitment, WishgateConfig};
use crate::error::RejectReason;
use crate::price::{PriceError, PriceSource};

const BASE58_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
pub const SIGNATURE_MIN_LEN: usize = 32;
pub const SIGNATURE_MAX_LEN: usize = 88;

/// Base58 alphabet and the length range of a 64-byte signature. Fast
/// rejection before any network call; the RPC layer stays the authority on
/// whether the string names a real transaction.
pub fn is_well_formed_signature(raw: &str) -> bool {
    (SIGNATURE_MIN_LEN..=SIGNATURE_MAX_LEN).contains(&raw.len())
        && raw.bytes().all(|b| BASE58_ALPHABET.contains(&b))
}

/// On-chain facts a verdict is derived from, coerced out of the
/// loosely-shaped RPC encoding at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct TxFacts {
    pub block_time: Option<i64>,
    pub failed: bool,
    pub account_keys: Vec<String>,
    pub pre_balances: Vec<u64>,
    pub post_balances: Vec<u64>,
}

/// Where transaction facts come from: the live RPC endpoint, or an
/// in-memory map for tests.
pub enum TxSource {
    Rpc(RpcTxSource),
    Mock(MockTxSource),
}

impl TxSource {
    /// `Ok(None)` means the signature names no visible transaction;
    /// transport faults are infrastructure errors.
    pub async fn fetch(&self, signature: &str) -> Result<Option<TxFacts>> {
        match self {
            Self::Rpc(source) => source.fetch(signature).await,
            Self::Mock(source) => Ok(source.fetch(signature)),
        }
    }
}

pub struct RpcTxSource {
    rpc: Arc<RpcClient>,
}

impl RpcTxSource {
    pub fn new(rpc_url: String, timeout: Duration, commitment: Option<&str>) -> Self {
        let rpc = Arc::new(RpcClient::new_with_timeout_and_commitment(
            rpc_url,
            timeout,
            parse_commitment(commitment),
        ));
        Self { rpc }
    }

    async fn fetch(&self, signature: &str) -> Result<Option<TxFacts>> {
        let Ok(parsed) = Signature::from_str(signature) else {
            // Well-formed base58 that still is not a 64-byte signature can
            // never be confirmed on chain.
            return Ok(None);
        };
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Json),
            commitment: Some(self.rpc.commitment()),
            max_supported_transaction_version: Some(0),
        };
        match self.rpc.get_transaction_with_config(&parsed, config).await {
            Ok(tx) => Ok(Some(facts_from_encoded(tx)?)),
            Err(err) if looks_like_missing(&err) => Ok(None),
            Err(err) => Err(err).context("getTransaction RPC call failed"),
        }
    }
}

// The JSON-RPC layer reports an unknown signature as an error string, not a
// typed variant; everything else is a transport fault.
fn looks_like_missing(err: &ClientError) -> bool {
    err.to_string().to_ascii_lowercase().contains("not found")
}

fn facts_from_encoded(tx: EncodedConfirmedTransactionWithStatusMeta) -> Result<TxFacts> {
    let meta = tx
        .transaction
        .meta
        .as_ref()
        .ok_or_else(|| anyhow!("transaction response is missing meta"))?;
    let account_keys = match &tx.transaction.transaction {
        EncodedTransaction::Json(ui) => match &ui.message {
            UiMessage::Raw(raw) => raw.account_keys.clone(),
            UiMessage::Parsed(parsed) => {
                parsed.account_keys.iter().map(|k| k.pubkey.clone()).collect()
            }
        },
        _ => return Err(anyhow!("unexpected transaction encoding in RPC response")),
    };
    Ok(TxFacts {
        block_time: tx.block_time,
        failed: meta.err.is_some(),
        account_keys,
        pre_balances: meta.pre_balances.clone(),
        post_balances: meta.post_balances.clone(),
    })
}

#[derive(Debug, Default)]
pub struct MockTxSource {
    txs: HashMap<String, TxFacts>,
}

impl MockTxSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, signature: impl Into<String>, facts: TxFacts) {
        self.txs.insert(signature.into(), facts);
    }

    fn fetch(&self, signature: &str) -> Option<TxFacts> {
        self.txs.get(signature).cloned()
    }
}

#[derive(Debug, Clone)]
pub struct VerifierPolicy {
    pub receiving_wallet: String,
    pub tolerance_bps: u64,
    pub max_transaction_age: Duration,
}

impl VerifierPolicy {
    pub fn from_config(cfg: &WishgateConfig) -> Result<Self> {
        Pubkey::from_str(&cfg.solana.receiving_wallet).context("invalid solana.receiving_wallet")?;
        Ok(Self {
            receiving_wallet: cfg.solana.receiving_wallet.clone(),
            tolerance_bps: cfg.verification.tolerance_bps,
            max_transaction_age: Duration::from_secs(cfg.verification.max_transaction_age_secs),
        })
    }
}

/// Everything persisted about a payment originates here, from chain
/// observation, never from the request body.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Verification {
    pub payer_wallet: String,
    pub paid_sol: f64,
    pub paid_usd: f64,
    pub confirmed_at_unix: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error(transparent)]
    Rejected(#[from] RejectReason),
    #[error("price feed unavailable")]
    Price(#[from] PriceError),
    #[error(transparent)]
    Infra(#[from] anyhow::Error),
}

/// Pure verdict over fetched facts. Check order: freshness, on-chain
/// success, recipient presence, balance-delta amount within tolerance.
pub fn evaluate_transfer(
    facts: &TxFacts,
    expected_usd: f64,
    usd_per_sol: f64,
    policy: &VerifierPolicy,
    now_unix: i64,
) -> Result<Verification, RejectReason> {
    let confirmed_at = facts.block_time.unwrap_or(0);
    let age_secs = now_unix.saturating_sub(confirmed_at);
    let max_secs = policy.max_transaction_age.as_secs() as i64;
    if age_secs > max_secs {
        return Err(RejectReason::Expired { age_secs, max_secs });
    }

    if facts.failed {
        return Err(RejectReason::ChainFailure);
    }

    let Some(recipient_index) = facts
        .account_keys
        .iter()
        .position(|key| key == &policy.receiving_wallet)
    else {
        return Err(RejectReason::WrongRecipient);
    };

    let pre = facts.pre_balances.get(recipient_index).copied().unwrap_or(0);
    let post = facts.post_balances.get(recipient_index).copied().unwrap_or(0);
    let actual_sol = post.saturating_sub(pre) as f64 / LAMPORTS_PER_SOL as f64;

    let expected_sol = expected_usd / usd_per_sol;
    let tolerance = expected_sol * policy.tolerance_bps as f64 / 10_000.0;
    if actual_sol < expected_sol - tolerance || actual_sol > expected_sol + tolerance {
        return Err(RejectReason::AmountMismatch {
            expected_sol,
            actual_sol,
        });
    }

    // Fee payer is the first static account.
    let payer_wallet = facts.account_keys.first().cloned().unwrap_or_default();

    Ok(Verification {
        payer_wallet,
        paid_sol: actual_sol,
        paid_usd: actual_sol * usd_per_sol,
        confirmed_at_unix: confirmed_at,
    })
}

pub struct ChainVerifier {
    source: TxSource,
    price: PriceSource,
    policy: VerifierPolicy,
}

impl ChainVerifier {
    pub fn new(source: TxSource, price: PriceSource, policy: VerifierPolicy) -> Self {
        Self {
            source,
            price,
            policy,
        }
    }

    pub fn from_config(cfg: &WishgateConfig) -> Result<Self> {
        let source = TxSource::Rpc(RpcTxSource::new(
            cfg.solana.rpc_url.clone(),
            Duration::from_millis(cfg.solana.request_timeout_ms),
            cfg.solana.commitment.as_deref(),
        ));
        let price = PriceSource::from_config(&cfg.oracle)?;
        Ok(Self::new(source, price, VerifierPolicy::from_config(cfg)?))
    }

    pub fn policy(&self) -> &VerifierPolicy {
        &self.policy
    }

    /// Display-only price estimate; admission paths use the strict fetch
    /// inside [`ChainVerifier::verify`].
    pub async fn estimate_usd_per_sol(&self) -> f64 {
        self.price.usd_per_sol_or_fallback().await
    }

    /// Fetch the price once, fetch the transaction, derive the verdict.
    pub async fn verify(
        &self,
        signature: &str,
        expected_usd: f64,
    ) -> Result<Verification, VerifyError> {
        if !is_well_formed_signature(signature) {
            return Err(RejectReason::InvalidFormat.into());
        }
        let usd_per_sol = self.price.usd_per_sol().await?;
        let Some(facts) = self.source.fetch(signature).await? else {
            return Err(RejectReason::NotFound.into());
        };
        let verification = evaluate_transfer(
            &facts,
            expected_usd,
            usd_per_sol,
            &self.policy,
            now_unix_secs(),
        )?;
        debug!(
            signature,
            payer = %verification.payer_wallet,
            paid_sol = verification.paid_sol,
            "transaction verified"
        );
        Ok(verification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECIPIENT: &str = "BmzAXDfy6rvSgj4BiZ7R8eEr83S2VpCMKVYwZ3EdgTnp";
    const PAYER: &str = "J6zwYzEPwoqbDbZUbXSbB4mLfMKTXcBXSCcBBcBk4Ku5";
    const NOW: i64 = 1_700_000_000;

    fn policy() -> VerifierPolicy {
        VerifierPolicy {
            receiving_wallet: RECIPIENT.to_string(),
            tolerance_bps: 500,
            max_transaction_age: Duration::from_secs(900),
        }
    }

    fn paid_facts(lamports: u64) -> TxFacts {
        TxFacts {
            block_time: Some(NOW - 60),
            failed: false,
            account_keys: vec![PAYER.to_string(), RECIPIENT.to_string()],
            pre_balances: vec![10_000_000_000, 500],
            post_balances: vec![10_000_000_000 - lamports, 500 + lamports],
        }
    }

    #[test]
    fn signature_format_check() {
        assert!(is_well_formed_signature(&"a".repeat(64)));
        assert!(is_well_formed_signature(&"3".repeat(32)));
        assert!(is_well_formed_signature(&"z".repeat(88)));
        // too short / too long
        assert!(!is_well_formed_signature(&"a".repeat(31)));
        assert!(!is_well_formed_signature(&"a".repeat(89)));
        // 0, O, I and l are outside the base58 alphabet
        assert!(!is_well_formed_signature(&"0".repeat(64)));
        assert!(!is_well_formed_signature(&"O".repeat(64)));
        assert!(!is_well_formed_signature(&"l".repeat(64)));
        assert!(!is_well_formed_signature(""));
    }

    #[test]
    fn exact_payment_is_accepted() {
        // $269 at $100/SOL -> 2.69 SOL
        let verification =
            evaluate_transfer(&paid_facts(2_690_000_000), 269.0, 100.0, &policy(), NOW).unwrap();
        assert_eq!(verification.payer_wallet, PAYER);
        assert!((verification.paid_sol - 2.69).abs() < 1e-9);
        assert!((verification.paid_usd - 269.0).abs() < 1e-6);
        assert_eq!(verification.confirmed_at_unix, NOW - 60);
    }

    #[test]
    fn payment_inside_tolerance_band_is_accepted() {
        // 4% under the expected 2.69 SOL, within the 5% band
        let lamports = (2_690_000_000f64 * 0.96) as u64;
        assert!(evaluate_transfer(&paid_facts(lamports), 269.0, 100.0, &policy(), NOW).is_ok());
    }

    #[test]
    fn payment_outside_tolerance_is_rejected_with_amounts() {
        let lamports = (2_690_000_000f64 * 0.90) as u64;
        let err =
            evaluate_transfer(&paid_facts(lamports), 269.0, 100.0, &policy(), NOW).unwrap_err();
        match err {
            RejectReason::AmountMismatch {
                expected_sol,
                actual_sol,
            } => {
                assert!((expected_sol - 2.69).abs() < 1e-9);
                assert!(actual_sol < expected_sol);
            }
            other => panic!("expected AmountMismatch, got {other:?}"),
        }
    }

    #[test]
    fn stale_transaction_is_rejected() {
        let mut facts = paid_facts(2_690_000_000);
        facts.block_time = Some(NOW - 901);
        let err = evaluate_transfer(&facts, 269.0, 100.0, &policy(), NOW).unwrap_err();
        assert!(matches!(err, RejectReason::Expired { age_secs: 901, .. }));
    }

    #[test]
    fn missing_block_time_counts_as_stale() {
        let mut facts = paid_facts(2_690_000_000);
        facts.block_time = None;
        let err = evaluate_transfer(&facts, 269.0, 100.0, &policy(), NOW).unwrap_err();
        assert!(matches!(err, RejectReason::Expired { .. }));
    }

    #[test]
    fn failed_transaction_is_rejected() {
        let mut facts = paid_facts(2_690_000_000);
        facts.failed = true;
        let err = evaluate_transfer(&facts, 269.0, 100.0, &policy(), NOW).unwrap_err();
        assert_eq!(err, RejectReason::ChainFailure);
    }

    #[test]
    fn transfer_to_someone_else_is_rejected() {
        let mut facts = paid_facts(2_690_000_000);
        facts.account_keys[1] = PAYER.to_string();
        let err = evaluate_transfer(&facts, 269.0, 100.0, &policy(), NOW).unwrap_err();
        assert_eq!(err, RejectReason::WrongRecipient);
    }

    #[test]
    fn recipient_present_but_unpaid_is_amount_mismatch() {
        let mut facts = paid_facts(0);
        facts.post_balances = facts.pre_balances.clone();
        let err = evaluate_transfer(&facts, 269.0, 100.0, &policy(), NOW).unwrap_err();
        assert!(matches!(err, RejectReason::AmountMismatch { .. }));
    }

    #[tokio::test]
    async fn verifier_maps_missing_transaction_to_not_found() {
        let verifier = ChainVerifier::new(
            TxSource::Mock(MockTxSource::new()),
            PriceSource::Fixed(100.0),
            policy(),
        );
        let err = verifier.verify(&"a".repeat(64), 269.0).await.unwrap_err();
        assert!(matches!(err, VerifyError::Rejected(RejectReason::NotFound)));
    }

    #[tokio::test]
    async fn verifier_rejects_malformed_signature_before_any_fetch() {
        let verifier = ChainVerifier::new(
            TxSource::Mock(MockTxSource::new()),
            PriceSource::Fixed(100.0),
            policy(),
        );
        let err = verifier.verify("not base58!!", 269.0).await.unwrap_err();
        assert!(matches!(
            err,
            VerifyError::Rejected(RejectReason::InvalidFormat)
        ));
    }
}
