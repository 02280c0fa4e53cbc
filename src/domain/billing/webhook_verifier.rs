//! Webhook signature verification.
//!
//! Verifies Stripe webhook signatures (HMAC-SHA256 over `timestamp.payload`)
//! before any byte of the body is interpreted. Includes a timestamp window
//! to reject replayed deliveries. Pure over bytes: verification failure
//! never touches state.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::stripe_event::{StripeEvent, VerifiedEvent};
use super::webhook_errors::WebhookError;

type HmacSha256 = Hmac<Sha256>;

/// Maximum allowed age for webhook deliveries (5 minutes).
const MAX_SIGNATURE_AGE_SECS: i64 = 300;

/// Clock skew tolerance for timestamps from the future (1 minute).
const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// Parsed `Stripe-Signature` header.
///
/// Format: `t=<timestamp>,v1=<hex signature>[,...]`. Unknown schemes are
/// skipped for forward compatibility.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SignatureHeader {
    timestamp: i64,
    v1_signature: Vec<u8>,
}

fn parse_signature_header(header: &str) -> Result<SignatureHeader, WebhookError> {
    let mut timestamp: Option<i64> = None;
    let mut v1_signature: Option<Vec<u8>> = None;

    for part in header.split(',') {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| WebhookError::ParseError("invalid signature header".to_string()))?;

        match key {
            "t" => {
                timestamp = Some(value.parse().map_err(|_| {
                    WebhookError::ParseError("invalid signature timestamp".to_string())
                })?);
            }
            "v1" => {
                v1_signature = Some(hex::decode(value).map_err(|_| {
                    WebhookError::ParseError("invalid v1 signature hex".to_string())
                })?);
            }
            _ => {}
        }
    }

    Ok(SignatureHeader {
        timestamp: timestamp
            .ok_or_else(|| WebhookError::ParseError("missing signature timestamp".to_string()))?,
        v1_signature: v1_signature
            .ok_or_else(|| WebhookError::ParseError("missing v1 signature".to_string()))?,
    })
}

/// Verifier for inbound payment provider webhooks.
pub struct WebhookVerifier {
    /// The webhook signing secret issued by the provider.
    secret: String,
}

impl WebhookVerifier {
    /// Creates a new verifier with the given signing secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Verifies the signature and decodes the payload into a typed event.
    ///
    /// # Errors
    ///
    /// - `ParseError` - malformed header or JSON body
    /// - `StaleTimestamp` / `FutureTimestamp` - delivery outside the window
    /// - `InvalidSignature` - HMAC mismatch
    /// - `MissingMetadata` - a checkout event without user correlation
    pub fn verify_and_decode(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<VerifiedEvent, WebhookError> {
        let header = parse_signature_header(signature_header)?;
        self.check_timestamp(header.timestamp)?;

        let expected = self.compute_signature(header.timestamp, payload);
        if !constant_time_eq(&expected, &header.v1_signature) {
            return Err(WebhookError::InvalidSignature);
        }

        let envelope: StripeEvent = serde_json::from_slice(payload)
            .map_err(|e| WebhookError::ParseError(e.to_string()))?;

        VerifiedEvent::from_envelope(envelope)
    }

    fn check_timestamp(&self, timestamp: i64) -> Result<(), WebhookError> {
        let age = chrono::Utc::now().timestamp() - timestamp;

        if age > MAX_SIGNATURE_AGE_SECS {
            return Err(WebhookError::StaleTimestamp);
        }
        if age < -MAX_CLOCK_SKEW_SECS {
            return Err(WebhookError::FutureTimestamp);
        }

        Ok(())
    }

    fn compute_signature(&self, timestamp: i64, payload: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }
}

/// Constant-time byte comparison, preventing timing leaks of the expected
/// signature.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
