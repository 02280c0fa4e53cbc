//! Resend implementation of the email sink.
//!
//! Resolves the recipient address from the users table and posts the
//! message to the Resend API. Callers treat delivery as best effort;
//! this adapter just reports failure and never retries.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::config::EmailConfig;
use crate::domain::foundation::{DomainError, ErrorCode, UserId};
use crate::ports::EmailSink;

const RESEND_API_URL: &str = "https://api.resend.com/emails";

/// Resend-backed EmailSink.
pub struct ResendEmailSink {
    config: EmailConfig,
    pool: PgPool,
    http: reqwest::Client,
}

impl ResendEmailSink {
    /// Creates a new sink with the given configuration and user lookup pool.
    pub fn new(config: EmailConfig, pool: PgPool) -> Self {
        Self {
            config,
            pool,
            http: reqwest::Client::new(),
        }
    }
}

fn build_payload(from: &str, to: &str, subject: &str, body: &str) -> serde_json::Value {
    serde_json::json!({
        "from": from,
        "to": [to],
        "subject": subject,
        "text": body,
    })
}

#[async_trait]
impl EmailSink for ResendEmailSink {
    async fn send_to_user(
        &self,
        user_id: &UserId,
        subject: &str,
        body: &str,
    ) -> Result<(), DomainError> {
        let email: Option<String> = sqlx::query_scalar("SELECT email FROM users WHERE id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DomainError::database(format!("Failed to resolve recipient: {}", e)))?;

        let Some(to) = email else {
            return Err(DomainError::new(
                ErrorCode::UserNotFound,
                format!("no user {} to email", user_id),
            ));
        };

        let payload = build_payload(&self.config.from_header(), &to, subject, body);
        let response = self
            .http
            .post(RESEND_API_URL)
            .bearer_auth(&self.config.resend_api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DomainError::external(format!("Resend request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(DomainError::external(format!(
                "Resend returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}
