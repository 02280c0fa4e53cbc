//! Webhook error taxonomy.
//!
//! Classifies every failure mode of webhook processing by how the provider's
//! redelivery machinery must react: reject without retry, retry via a 5xx,
//! or acknowledge so the event is never sent again.

use axum::http::StatusCode;
use thiserror::Error;

use crate::domain::foundation::{DomainError, ErrorCode};

/// Errors that occur during webhook verification and reconciliation.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Webhook signature verification failed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Webhook timestamp is older than the acceptable window.
    #[error("Signature timestamp too old")]
    StaleTimestamp,

    /// Webhook timestamp is in the future beyond clock skew tolerance.
    #[error("Signature timestamp in the future")]
    FutureTimestamp,

    /// Failed to parse the signature header or JSON payload.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Required field missing from the event payload.
    #[error("Missing metadata: {0}")]
    MissingMetadata(&'static str),

    /// The provider price id does not map to any known plan.
    ///
    /// Surfaced as retryable so the operator can register the plan and let
    /// redelivery pick the event up again.
    #[error("Plan not recognized for price {0}")]
    PlanNotRecognized(String),

    /// The provider customer carries no user correlation metadata.
    ///
    /// Fatal: the event can never succeed, so it is acknowledged to stop
    /// redelivery and logged as a data-integrity incident.
    #[error("Cannot resolve user for customer {0}")]
    UnresolvableUser(String),

    /// Payment provider lookup failed (network, timeout, API error).
    #[error("Provider error: {0}")]
    Provider(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Event was intentionally not processed (unhandled kind).
    #[error("Event ignored: {0}")]
    Ignored(String),
}

impl WebhookError {
    /// Returns true if the provider should redeliver this webhook.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WebhookError::PlanNotRecognized(_)
                | WebhookError::Provider(_)
                | WebhookError::Database(_)
        )
    }

    /// Maps the error to the HTTP status returned to the provider.
    ///
    /// - 2xx acknowledges and stops redelivery
    /// - 4xx rejects without engine-side retry expectations
    /// - 5xx triggers provider redelivery
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::InvalidSignature | WebhookError::StaleTimestamp => {
                StatusCode::UNAUTHORIZED
            }

            WebhookError::FutureTimestamp
            | WebhookError::ParseError(_)
            | WebhookError::MissingMetadata(_) => StatusCode::BAD_REQUEST,

            // Acknowledged: redelivery can never help these
            WebhookError::UnresolvableUser(_) | WebhookError::Ignored(_) => StatusCode::OK,

            WebhookError::PlanNotRecognized(_)
            | WebhookError::Provider(_)
            | WebhookError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DomainError> for WebhookError {
    fn from(err: DomainError) -> Self {
        match err.code {
            ErrorCode::ExternalServiceError => WebhookError::Provider(err.message),
            _ => WebhookError::Database(err.message),
        }
    }
}
