//! EmailSink port - outbound message delivery.
//!
//! The engine submits reward and reminder emails fire-and-forget: delivery
//! runs on a detached task after the financial transaction commits, so a
//! mail outage can never roll back an entitlement change. Templating and
//! transport live behind this port.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, UserId};

/// Port for sending a message to a user.
#[async_trait]
pub trait EmailSink: Send + Sync {
    /// Sends an email to the given user's registered address.
    async fn send_to_user(
        &self,
        user_id: &UserId,
        subject: &str,
        body: &str,
    ) -> Result<(), DomainError>;
}
