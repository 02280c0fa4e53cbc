//! Referral domain module.
//!
//! The referral ledger entity and the milestone reward calculation.

mod referral;
pub mod reward;

pub use referral::Referral;
