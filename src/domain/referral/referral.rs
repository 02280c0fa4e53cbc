//! Referral link entity.

use crate::domain::foundation::{ReferralId, Timestamp, UserId};
use serde::{Deserialize, Serialize};

/// Immutable link between a referrer and the user they brought in.
///
/// # Invariants
///
/// - A user is the referred party at most once (unique on `referred_user_id`)
/// - A user may refer arbitrarily many others
/// - Created once at registration, never updated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Referral {
    pub id: ReferralId,

    /// The user whose referral code was used.
    pub referrer_user_id: UserId,

    /// The user who signed up with the code.
    pub referred_user_id: UserId,

    pub created_at: Timestamp,
}

impl Referral {
    pub fn new(referrer_user_id: UserId, referred_user_id: UserId, created_at: Timestamp) -> Self {
        Self {
            id: ReferralId::new(),
            referrer_user_id,
            referred_user_id,
            created_at,
        }
    }
}
