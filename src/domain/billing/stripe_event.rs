//! Stripe webhook event types.
//!
//! The raw envelope is decoded in two steps: the outer [`StripeEvent`] is
//! parsed after signature verification, then [`VerifiedEvent::from_envelope`]
//! narrows it into a typed payload for the event kinds the reconciler
//! handles. Fields outside the engine's needs are ignored.

use serde::{Deserialize, Serialize};

use super::WebhookError;

/// Raw Stripe webhook envelope (simplified).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeEvent {
    /// Unique identifier for the event (evt_xxx format).
    pub id: String,

    /// Type of event (e.g. "checkout.session.completed").
    #[serde(rename = "type")]
    pub event_type: String,

    /// Time at which the event was created (Unix timestamp).
    pub created: i64,

    /// Container for the event-specific object.
    pub data: StripeEventData,

    /// Whether this is a live mode event (vs test mode).
    #[serde(default)]
    pub livemode: bool,
}

/// Container for event-specific data.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeEventData {
    /// The object that triggered the event (polymorphic by event type).
    pub object: serde_json::Value,
}

/// Event kinds the reconciler cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    CheckoutSessionCompleted,
    CustomerSubscriptionUpdated,
    CustomerSubscriptionDeleted,
    Unknown,
}

impl EventKind {
    /// Parse event kind from the provider's type string.
    pub fn parse(s: &str) -> Self {
        match s {
            "checkout.session.completed" => Self::CheckoutSessionCompleted,
            "customer.subscription.updated" => Self::CustomerSubscriptionUpdated,
            "customer.subscription.deleted" => Self::CustomerSubscriptionDeleted,
            _ => Self::Unknown,
        }
    }

    /// The provider's type string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckoutSessionCompleted => "checkout.session.completed",
            Self::CustomerSubscriptionUpdated => "customer.subscription.updated",
            Self::CustomerSubscriptionDeleted => "customer.subscription.deleted",
            Self::Unknown => "unknown",
        }
    }
}

/// Checkout session mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutMode {
    /// One-time payment (class purchase).
    Payment,
    /// Recurring subscription.
    Subscription,
    /// Saved payment details, no charge.
    Setup,
}

/// Metadata attached to a checkout session at creation time.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CheckoutMetadata {
    /// Internal user id, set by the checkout-creating endpoint.
    #[serde(rename = "userId")]
    pub user_id: Option<String>,

    /// Marks what a one-time payment bought (currently only "class").
    pub purchase: Option<String>,

    /// Display name for a purchased class.
    #[serde(rename = "className")]
    pub class_name: Option<String>,
}

impl CheckoutMetadata {
    /// Returns true if this checkout is a one-time class purchase.
    pub fn is_class_purchase(&self) -> bool {
        self.purchase.as_deref() == Some("class")
    }
}

/// Typed `checkout.session.completed` payload.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CheckoutSessionObject {
    /// Session id (cs_xxx format) - the natural key for class purchases.
    pub id: String,

    /// Payment or subscription mode.
    pub mode: CheckoutMode,

    /// Provider customer id.
    pub customer: Option<String>,

    /// Provider subscription id (subscription mode only).
    pub subscription: Option<String>,

    #[serde(default)]
    pub metadata: CheckoutMetadata,
}

/// Typed `customer.subscription.*` payload.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubscriptionEventObject {
    /// Provider subscription id (sub_xxx format).
    pub id: String,

    /// Provider customer id.
    pub customer: String,

    /// Provider-reported status string.
    pub status: String,

    /// End of the current billing period (Unix timestamp).
    pub current_period_end: i64,
}

/// Typed payload, narrowed by event kind.
#[derive(Debug, Clone)]
pub enum EventPayload {
    Checkout(CheckoutSessionObject),
    Subscription(SubscriptionEventObject),
    /// Raw object for kinds the engine does not handle.
    Other(serde_json::Value),
}

/// A verified, decoded webhook event ready for reconciliation.
#[derive(Debug, Clone)]
pub struct VerifiedEvent {
    /// Provider event id, the idempotency key for processing.
    pub id: String,

    pub kind: EventKind,

    /// Provider event timestamp, used for ordering checks.
    pub created: i64,

    pub livemode: bool,

    pub payload: EventPayload,
}

impl VerifiedEvent {
    /// Narrows a raw envelope into a typed event.
    ///
    /// # Errors
    ///
    /// - `ParseError` if the object does not match the shape its kind implies
    /// - `MissingMetadata("userId")` if a checkout session carries no user
    ///   correlation - such an event could never be reconciled, so it is
    ///   rejected before any state is touched
    pub fn from_envelope(event: StripeEvent) -> Result<Self, WebhookError> {
        let kind = EventKind::parse(&event.event_type);
        let payload = match kind {
            EventKind::CheckoutSessionCompleted => {
                let session: CheckoutSessionObject =
                    serde_json::from_value(event.data.object)
                        .map_err(|e| WebhookError::ParseError(e.to_string()))?;
                if session.metadata.user_id.is_none() {
                    return Err(WebhookError::MissingMetadata("userId"));
                }
                EventPayload::Checkout(session)
            }
            EventKind::CustomerSubscriptionUpdated | EventKind::CustomerSubscriptionDeleted => {
                let subscription: SubscriptionEventObject =
                    serde_json::from_value(event.data.object)
                        .map_err(|e| WebhookError::ParseError(e.to_string()))?;
                EventPayload::Subscription(subscription)
            }
            EventKind::Unknown => EventPayload::Other(event.data.object),
        };

        Ok(Self {
            id: event.id,
            kind,
            created: event.created,
            livemode: event.livemode,
            payload,
        })
    }
}
