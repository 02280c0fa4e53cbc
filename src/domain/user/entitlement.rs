//! Entitlement derivation.
//!
//! A user is intended to hold one subscription row, but history can leave
//! several (a paid checkout superseding a system trial that another code
//! path recreated). Readers therefore select a single *primary* row by
//! precedence before deriving access:
//!
//! 1. `active`
//! 2. paid-track `trialing` (`plan_id` set)
//! 3. system `trialing` (`plan_id` null), if unexpired
//!
//! `is_subscribed` is then `is_permanent_free OR primary grants access`.

use crate::domain::billing::{Subscription, SubscriptionStatus};
use crate::domain::foundation::Timestamp;

use super::User;

/// Precedence rank for primary-subscription selection. Lower wins.
fn precedence(sub: &Subscription, now: Timestamp) -> Option<u8> {
    match sub.status {
        SubscriptionStatus::Active => Some(0),
        SubscriptionStatus::Trialing if sub.plan_id.is_some() => Some(1),
        SubscriptionStatus::Trialing if !sub.is_expired(now) => Some(2),
        _ => None,
    }
}

/// Selects the subscription row that represents the user's entitlement.
///
/// Rows outside the precedence classes (past-due, canceled, expired system
/// trials) are never primary. Ties break toward the latest period end.
pub fn primary_subscription(subs: &[Subscription], now: Timestamp) -> Option<&Subscription> {
    subs.iter()
        .filter_map(|s| precedence(s, now).map(|rank| (rank, s)))
        .min_by_key(|(rank, s)| (*rank, std::cmp::Reverse(s.current_period_end)))
        .map(|(_, s)| s)
}

/// Derives whether the user currently has premium access.
pub fn is_subscribed(user: &User, subs: &[Subscription], now: Timestamp) -> bool {
    if user.is_permanent_free {
        return true;
    }
    primary_subscription(subs, now)
        .map(|s| s.grants_access(now))
        .unwrap_or(false)
}
