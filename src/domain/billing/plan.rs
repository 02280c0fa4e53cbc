//! Subscription plan catalog entry.
//!
//! Plans are operator-created reference data; the engine only reads them to
//! map the provider's price id onto an internal plan.

use crate::domain::foundation::PlanId;
use serde::{Deserialize, Serialize};

/// How often a plan bills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Month,
    Year,
}

impl BillingInterval {
    /// Database/API string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    /// Parses the database representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "month" => Some(Self::Month),
            "year" => Some(Self::Year),
            _ => None,
        }
    }
}

/// Catalog entry describing a purchasable plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    /// Unique identifier.
    pub id: PlanId,

    /// Display name (e.g. "Studyhall Plus Monthly").
    pub name: String,

    /// Price in cents.
    pub price_cents: i64,

    /// Billing cadence.
    pub interval: BillingInterval,

    /// The provider's price identifier this plan maps to.
    pub provider_price_id: String,
}
