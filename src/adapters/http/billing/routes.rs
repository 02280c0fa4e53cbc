//! Axum router configuration for the billing endpoints.

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{get_entitlement, handle_stripe_webhook, BillingAppState};

/// Billing API routes (authenticated callers).
///
/// - `GET /entitlement` - derived entitlement for the current user
pub fn billing_routes() -> Router<BillingAppState> {
    Router::new().route("/entitlement", get(get_entitlement))
}

/// Webhook routes.
///
/// Separate from the billing routes because webhooks carry no user session;
/// authenticity comes from the signature.
///
/// - `POST /stripe` - payment provider events
pub fn webhook_routes() -> Router<BillingAppState> {
    Router::new().route("/stripe", post(handle_stripe_webhook))
}

/// The complete billing module router, suitable for nesting under `/api`.
pub fn billing_router() -> Router<BillingAppState> {
    Router::new()
        .nest("/billing", billing_routes())
        .nest("/webhooks", webhook_routes())
}
