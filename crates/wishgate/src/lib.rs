//! Wishgate: admission engine for the wishlist NFT presale.
//!
//! A user pays SOL to the project wallet by hand, then submits the
//! transaction signature. The engine verifies the transfer against chain
//! state (recipient, amount at the current SOL/USD price, freshness) and
//! admits a reservation under the global per-tier supply caps and per-user
//! caps. Signatures are single-use across the whole system.
//!
//! The account/referral directory and task-reward bookkeeping of the promo
//! site live here as well; invite milestones feed back into the admission
//! engine as free low-tier grants.

pub mod account;
pub mod admission;
pub mod clock;
pub mod config;
pub mod error;
pub mod ledger;
pub mod price;
pub mod tasks;
pub mod tier;
pub mod verify;

pub use admission::AdmissionController;
pub use error::{AdmissionError, RejectReason};
pub use ledger::{MemoryLedger, ReservationRecord};
pub use tier::{Tier, TierBook, TierPolicy};
