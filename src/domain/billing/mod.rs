//! Billing domain module.
//!
//! The subscription side of the reconciliation engine: the entitlement
//! aggregate, the plan catalog entry, webhook event types, signature
//! verification, and the webhook error taxonomy.

mod plan;
mod status;
mod stripe_event;
mod subscription;
mod webhook_errors;
mod webhook_verifier;

pub use plan::{BillingInterval, SubscriptionPlan};
pub use status::SubscriptionStatus;
pub use stripe_event::{
    CheckoutMetadata, CheckoutMode, CheckoutSessionObject, EventKind, EventPayload, StripeEvent,
    StripeEventData, SubscriptionEventObject, VerifiedEvent,
};
pub use subscription::{Subscription, SubscriptionUpsert, SYSTEM_TRIAL_DAYS};
pub use webhook_errors::WebhookError;
pub use webhook_verifier::WebhookVerifier;
