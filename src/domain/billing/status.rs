//! Subscription status lifecycle.
//!
//! A subscription moves through `trialing -> active <-> past_due -> canceled`,
//! with `canceled` terminal for the billing cycle (a fresh checkout re-enters
//! at `active`). Transitions are driven exclusively by provider events; the
//! reconciler applies the provider's reported status with last-write-wins
//! semantics, gated by event-timestamp monotonicity. The enum therefore
//! carries no local transition table, only classification helpers.

use serde::{Deserialize, Serialize};

/// Current state of a subscription in the payment lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Trial period, either a paid-track trial or a system trial.
    Trialing,

    /// Fully paid subscription.
    Active,

    /// Payment failed, provider is retrying.
    PastDue,

    /// Subscription ended for this billing cycle.
    Canceled,
}

impl SubscriptionStatus {
    /// Maps a payment provider status string onto the local lifecycle.
    ///
    /// Returns `None` for statuses the engine does not track; callers decide
    /// whether that is an error or an ignorable event.
    pub fn from_provider(s: &str) -> Option<Self> {
        match s {
            "trialing" => Some(Self::Trialing),
            "active" => Some(Self::Active),
            "past_due" => Some(Self::PastDue),
            "canceled" | "unpaid" | "incomplete_expired" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Database/API string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trialing => "trialing",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
        }
    }

    /// Returns true if a referred user in this status counts toward the
    /// referrer's successful-referral total (paid-track only; the plan gate
    /// is applied separately).
    pub fn counts_for_referral(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }
}
