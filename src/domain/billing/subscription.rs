//! Subscription aggregate entity.
//!
//! One subscription row is intended per user (unique constraint on `user_id`,
//! enforced by the reconciler's upsert). A row with `plan_id = None` is a
//! system trial granted at email verification; a row with a plan is on the
//! paid track.
//!
//! # Design Decisions
//!
//! - **Upsert, never delete**: rows are superseded in place, keyed by user
//! - **Provider is authoritative**: status and period mirror the provider's
//!   reported state; the stored `provider_event_ts` rejects stale events
//! - **System trial length**: 30 days from grant

use crate::domain::foundation::{PlanId, SubscriptionId, Timestamp, UserId};
use serde::{Deserialize, Serialize};

use super::SubscriptionStatus;

/// Length of the free system trial granted at email verification.
pub const SYSTEM_TRIAL_DAYS: i64 = 30;

/// Subscription aggregate - a user's entitlement state.
///
/// # Invariants
///
/// - `id` is globally unique
/// - `user_id` is unique (one subscription row per user)
/// - `current_period_start <= current_period_end`
/// - `plan_id = None` only for system trials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Unique identifier for this subscription row.
    pub id: SubscriptionId,

    /// User who owns this subscription.
    pub user_id: UserId,

    /// Plan on the paid track; `None` marks a system trial.
    pub plan_id: Option<PlanId>,

    /// Current status in the subscription lifecycle.
    pub status: SubscriptionStatus,

    /// Start of current billing period.
    pub current_period_start: Timestamp,

    /// End of current billing period.
    pub current_period_end: Timestamp,

    /// External payment provider name (e.g. "stripe"); `None` for system trials.
    pub payment_provider: Option<String>,

    /// Provider invoice id correlating the latest payment.
    pub invoice_id: Option<String>,

    /// Unix timestamp of the last provider event applied to this row.
    ///
    /// Older events are rejected so out-of-order redelivery cannot regress
    /// the stored period or status.
    pub provider_event_ts: Option<i64>,

    /// When the row was created.
    pub created_at: Timestamp,

    /// When the row was last updated.
    pub updated_at: Timestamp,
}

impl Subscription {
    /// Creates a free 30-day system trial for a newly verified user.
    pub fn system_trial(id: SubscriptionId, user_id: UserId, granted_at: Timestamp) -> Self {
        Self {
            id,
            user_id,
            plan_id: None,
            status: SubscriptionStatus::Trialing,
            current_period_start: granted_at,
            current_period_end: granted_at.add_days(SYSTEM_TRIAL_DAYS),
            payment_provider: None,
            invoice_id: None,
            provider_event_ts: None,
            created_at: granted_at,
            updated_at: granted_at,
        }
    }

    /// Returns true if this is a system trial (no plan attached).
    pub fn is_system_trial(&self) -> bool {
        self.plan_id.is_none()
    }

    /// Returns true if the billing period has ended at `now`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now.is_after(&self.current_period_end)
    }

    /// Returns true if this subscription grants premium access at `now`.
    ///
    /// Active always grants. A paid-track trial grants regardless of period
    /// (the provider will flip the status when it ends). A system trial
    /// grants only while unexpired. Past-due and canceled do not grant.
    pub fn grants_access(&self, now: Timestamp) -> bool {
        match self.status {
            SubscriptionStatus::Active => true,
            SubscriptionStatus::Trialing => {
                self.plan_id.is_some() || !self.is_expired(now)
            }
            SubscriptionStatus::PastDue | SubscriptionStatus::Canceled => false,
        }
    }

    /// Returns true if this subscription makes its owner count as a
    /// successful referral: on the paid track and currently active or
    /// trialing. A bare system trial never counts.
    pub fn counts_as_successful_referral(&self) -> bool {
        self.plan_id.is_some() && self.status.counts_for_referral()
    }

    /// Returns true if an incoming provider event with timestamp `event_ts`
    /// is newer than (or concurrent with) the last applied one.
    pub fn accepts_event_at(&self, event_ts: i64) -> bool {
        match self.provider_event_ts {
            Some(applied) => event_ts >= applied,
            None => true,
        }
    }
}

/// Values written by the reconciler's upsert for a paid activation.
///
/// Keyed by `user_id`: inserts a fresh row or replaces the existing row's
/// billing fields in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionUpsert {
    pub user_id: UserId,
    pub plan_id: PlanId,
    pub status: SubscriptionStatus,
    pub current_period_start: Timestamp,
    pub current_period_end: Timestamp,
    pub payment_provider: String,
    pub invoice_id: Option<String>,
    /// Provider event timestamp recorded for monotonicity checks.
    pub provider_event_ts: i64,
}
