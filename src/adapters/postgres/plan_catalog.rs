//! PostgreSQL implementation of the plan catalog.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::billing::{BillingInterval, SubscriptionPlan};
use crate::domain::foundation::{DomainError, ErrorCode, PlanId};
use crate::ports::PlanCatalog;

/// PostgreSQL implementation of the PlanCatalog port.
pub struct PostgresPlanCatalog {
    pool: PgPool,
}

impl PostgresPlanCatalog {
    /// Creates a new catalog with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PlanRow {
    id: Uuid,
    name: String,
    price_cents: i64,
    billing_interval: String,
    provider_price_id: String,
}

impl TryFrom<PlanRow> for SubscriptionPlan {
    type Error = DomainError;

    fn try_from(row: PlanRow) -> Result<Self, Self::Error> {
        let interval = BillingInterval::parse(&row.billing_interval).ok_or_else(|| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Invalid billing interval: {}", row.billing_interval),
            )
        })?;
        Ok(SubscriptionPlan {
            id: PlanId::from_uuid(row.id),
            name: row.name,
            price_cents: row.price_cents,
            interval,
            provider_price_id: row.provider_price_id,
        })
    }
}

#[async_trait]
impl PlanCatalog for PostgresPlanCatalog {
    async fn find_by_provider_price_id(
        &self,
        price_id: &str,
    ) -> Result<Option<SubscriptionPlan>, DomainError> {
        let row: Option<PlanRow> = sqlx::query_as(
            "SELECT id, name, price_cents, billing_interval, provider_price_id \
             FROM subscription_plans WHERE provider_price_id = $1",
        )
        .bind(price_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to load plan: {}", e)))?;

        row.map(SubscriptionPlan::try_from).transpose()
    }
}
