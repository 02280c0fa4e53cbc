//! Wire types for the billing HTTP surface.

use serde::Serialize;

use crate::application::handlers::billing::EntitlementView;

/// Acknowledgement body returned to the payment provider.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

impl WebhookAck {
    pub fn ok() -> Self {
        Self { received: true }
    }
}

/// Standard error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Entitlement read for the profile aggregator.
#[derive(Debug, Serialize)]
pub struct EntitlementResponse {
    pub is_subscribed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_period_end: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<EntitlementView> for EntitlementResponse {
    fn from(view: EntitlementView) -> Self {
        Self {
            is_subscribed: view.is_subscribed,
            status: view.status.map(|s| s.as_str()),
            plan_id: view.plan_id.map(|p| p.to_string()),
            current_period_end: view.current_period_end.map(|t| *t.as_datetime()),
        }
    }
}
