//! Payment provider port - lookup API of the external billing system.
//!
//! Webhook payloads carry only fragments; reconciliation re-fetches the
//! authoritative objects. Both lookups run inside the reconciliation
//! transaction, so implementations must bound their latency - the
//! transaction rolls back on timeout and the provider redelivers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::billing::WebhookError;

/// Live subscription object as reported by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSubscription {
    /// Provider subscription id (sub_xxx).
    pub id: String,

    /// Provider customer id.
    pub customer: String,

    /// Provider status string ("active", "trialing", ...).
    pub status: String,

    /// Current billing period start (Unix timestamp).
    pub current_period_start: i64,

    /// Current billing period end (Unix timestamp).
    pub current_period_end: i64,

    /// The price the customer subscribed to; maps onto an internal plan.
    pub price_id: String,

    /// Latest invoice id, stored for correlation.
    pub latest_invoice: Option<String>,
}

/// Customer object as reported by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCustomer {
    /// Provider customer id (cus_xxx).
    pub id: String,

    pub email: Option<String>,

    /// Internal user id from customer metadata. Absence is a data-integrity
    /// gap upstream: events for this customer can never be reconciled.
    pub user_id: Option<String>,
}

/// Errors from provider lookups.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The bounded lookup timeout elapsed.
    #[error("provider request timed out")]
    Timeout,

    /// Connection-level failure.
    #[error("provider network error: {0}")]
    Network(String),

    /// The provider answered with a non-success status.
    #[error("provider API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The referenced object does not exist.
    #[error("provider object not found: {0}")]
    NotFound(String),

    /// The response body did not match the expected shape.
    #[error("provider response decode error: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Returns true if a later attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Timeout | ProviderError::Network(_) => true,
            ProviderError::Api { status, .. } => *status >= 500 || *status == 429,
            ProviderError::NotFound(_) | ProviderError::Decode(_) => false,
        }
    }
}

impl From<ProviderError> for WebhookError {
    fn from(err: ProviderError) -> Self {
        WebhookError::Provider(err.to_string())
    }
}

/// Port for the provider's retrieve-by-id lookup API.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Retrieves a subscription by provider id.
    async fn fetch_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, ProviderError>;

    /// Retrieves a customer by provider id.
    async fn fetch_customer(&self, customer_id: &str) -> Result<ProviderCustomer, ProviderError>;
}
