//! PlanCatalog port - read-only access to the plan reference data.

use async_trait::async_trait;

use crate::domain::billing::SubscriptionPlan;
use crate::domain::foundation::DomainError;

/// Maps provider price ids onto internal plans.
///
/// Plans are operator-created; the engine never writes them. An unmapped
/// price id is surfaced by the caller as a retryable failure so the event
/// redelivers once the operator registers the plan.
#[async_trait]
pub trait PlanCatalog: Send + Sync {
    /// Finds the plan for a provider price id.
    async fn find_by_provider_price_id(
        &self,
        price_id: &str,
    ) -> Result<Option<SubscriptionPlan>, DomainError>;
}
