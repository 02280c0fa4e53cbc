//! GetEntitlementHandler - the profile-aggregation read side.
//!
//! Exposes the derived entitlement after reconciliation: the primary
//! subscription selected by precedence, and the `is_subscribed` flag.

use std::sync::Arc;

use crate::domain::billing::SubscriptionStatus;
use crate::domain::foundation::{DomainError, ErrorCode, PlanId, Timestamp, UserId};
use crate::domain::user::entitlement;
use crate::ports::EntitlementStore;

/// Query for a user's derived entitlement.
#[derive(Debug, Clone)]
pub struct GetEntitlementQuery {
    pub user_id: UserId,
}

/// Derived entitlement view consumed by the profile aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitlementView {
    pub is_subscribed: bool,
    /// Primary subscription status, if any row is primary.
    pub status: Option<SubscriptionStatus>,
    pub plan_id: Option<PlanId>,
    pub current_period_end: Option<Timestamp>,
}

/// Handler deriving entitlement from the store.
pub struct GetEntitlementHandler {
    store: Arc<dyn EntitlementStore>,
}

impl GetEntitlementHandler {
    pub fn new(store: Arc<dyn EntitlementStore>) -> Self {
        Self { store }
    }

    pub async fn handle(&self, query: GetEntitlementQuery) -> Result<EntitlementView, DomainError> {
        let user = self
            .store
            .find_user(&query.user_id)
            .await?
            .ok_or_else(|| DomainError::new(ErrorCode::UserNotFound, "user not found"))?;

        let subscriptions = self.store.subscriptions_for_user(&query.user_id).await?;
        let now = Timestamp::now();

        let primary = entitlement::primary_subscription(&subscriptions, now);
        Ok(EntitlementView {
            is_subscribed: entitlement::is_subscribed(&user, &subscriptions, now),
            status: primary.map(|s| s.status),
            plan_id: primary.and_then(|s| s.plan_id),
            current_period_end: primary.map(|s| s.current_period_end),
        })
    }
}
