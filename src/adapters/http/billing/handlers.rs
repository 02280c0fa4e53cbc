//! HTTP handlers for the billing endpoints.
//!
//! These handlers connect axum routes to the application layer. The webhook
//! endpoint receives the raw body as bytes - it must never be parsed before
//! signature verification.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use crate::application::handlers::billing::{
    GetEntitlementHandler, GetEntitlementQuery, ProcessWebhookCommand, ProcessWebhookHandler,
};
use crate::domain::billing::WebhookVerifier;
use crate::domain::foundation::{DomainError, ErrorCode, UserId};
use crate::ports::{EmailSink, EntitlementStore, PaymentProvider, PlanCatalog};

use super::dto::{EntitlementResponse, ErrorResponse, WebhookAck};

// ════════════════════════════════════════════════════════════════════════════════
// Application State
// ════════════════════════════════════════════════════════════════════════════════

/// Shared application state containing all billing dependencies.
///
/// Cloned per request; dependencies are Arc-wrapped trait objects so tests
/// can swap in doubles.
#[derive(Clone)]
pub struct BillingAppState {
    pub store: Arc<dyn EntitlementStore>,
    pub payment_provider: Arc<dyn PaymentProvider>,
    pub plan_catalog: Arc<dyn PlanCatalog>,
    pub email_sink: Arc<dyn EmailSink>,
    pub webhook_secret: String,
}

impl BillingAppState {
    /// Builds the webhook processing handler from the shared state.
    pub fn webhook_handler(&self) -> ProcessWebhookHandler {
        ProcessWebhookHandler::new(
            WebhookVerifier::new(self.webhook_secret.clone()),
            self.store.clone(),
            self.payment_provider.clone(),
            self.plan_catalog.clone(),
            self.email_sink.clone(),
        )
    }

    /// Builds the entitlement query handler from the shared state.
    pub fn entitlement_handler(&self) -> GetEntitlementHandler {
        GetEntitlementHandler::new(self.store.clone())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// User Context
// ════════════════════════════════════════════════════════════════════════════════

/// Authenticated user context extracted from the request.
///
/// The surrounding platform's auth middleware resolves the session and
/// forwards the user id in the X-User-Id header.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
}

/// Rejection type for AuthenticatedUser extraction.
pub struct AuthenticationRequired;

impl IntoResponse for AuthenticationRequired {
    fn into_response(self) -> axum::response::Response {
        let error = ErrorResponse::new("AUTHENTICATION_REQUIRED", "Authentication is required");
        (StatusCode::UNAUTHORIZED, Json(error)).into_response()
    }
}

impl<S> axum::extract::FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AuthenticationRequired;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut axum::http::request::Parts,
        _state: &'life1 S,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self, Self::Rejection>> + Send + 'async_trait>,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move {
            let user_id = parts
                .headers
                .get("X-User-Id")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<UserId>().ok())
                .ok_or(AuthenticationRequired)?;

            Ok(AuthenticatedUser { user_id })
        })
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Handlers
// ════════════════════════════════════════════════════════════════════════════════

/// POST /api/webhooks/stripe - the payment provider webhook endpoint.
///
/// Responds 200 `{"received":true}` for every outcome that should stop
/// provider redelivery - including deliberately ignored kinds and the fatal
/// unresolvable-user case - and a non-2xx when redelivery should happen.
pub async fn handle_stripe_webhook(
    State(state): State<BillingAppState>,
    headers: axum::http::HeaderMap,
    body: axum::body::Bytes,
) -> axum::response::Response {
    let Some(signature) = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
    else {
        let error = ErrorResponse::new("MISSING_SIGNATURE", "Missing Stripe-Signature header");
        return (StatusCode::BAD_REQUEST, Json(error)).into_response();
    };

    let cmd = ProcessWebhookCommand {
        payload: body.to_vec(),
        signature: signature.to_string(),
    };

    match state.webhook_handler().handle(cmd).await {
        Ok(outcome) => {
            tracing::debug!(?outcome, "webhook processed");
            (StatusCode::OK, Json(WebhookAck::ok())).into_response()
        }
        Err(e) => {
            let status = e.status_code();
            if status.is_success() {
                // Fatal-but-acknowledged: already logged where it was detected.
                return (status, Json(WebhookAck::ok())).into_response();
            }
            if e.is_retryable() {
                tracing::error!(error = %e, "webhook processing failed; provider will redeliver");
            } else {
                tracing::warn!(error = %e, "webhook rejected");
            }
            let code = if e.is_retryable() {
                "PROCESSING_FAILED"
            } else {
                "VERIFICATION_FAILED"
            };
            (status, Json(ErrorResponse::new(code, e.to_string()))).into_response()
        }
    }
}

/// GET /api/billing/entitlement - derived entitlement for the caller.
pub async fn get_entitlement(
    State(state): State<BillingAppState>,
    user: AuthenticatedUser,
) -> Result<Json<EntitlementResponse>, BillingApiError> {
    let view = state
        .entitlement_handler()
        .handle(GetEntitlementQuery {
            user_id: user.user_id,
        })
        .await?;

    Ok(Json(EntitlementResponse::from(view)))
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Handling
// ════════════════════════════════════════════════════════════════════════════════

/// API error wrapper converting domain errors to HTTP responses.
pub struct BillingApiError(DomainError);

impl From<DomainError> for BillingApiError {
    fn from(err: DomainError) -> Self {
        Self(err)
    }
}

impl IntoResponse for BillingApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.0.code {
            ErrorCode::UserNotFound
            | ErrorCode::SubscriptionNotFound
            | ErrorCode::PlanNotFound => StatusCode::NOT_FOUND,
            ErrorCode::ValidationFailed | ErrorCode::InvalidFormat => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorResponse::new(self.0.code.to_string(), self.0.message().to_string());
        (status, Json(body)).into_response()
    }
}
