//! Stripe lookup API adapter.
//!
//! Implements the `PaymentProvider` port against Stripe's retrieve-by-id
//! endpoints. Every request carries a bounded timeout because these lookups
//! run on the reconciliation path.
//!
//! # Security
//!
//! The API key is held as a `secrecy::SecretString` and only exposed when
//! the authorization header is built.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::PaymentConfig;
use crate::ports::{PaymentProvider, ProviderCustomer, ProviderError, ProviderSubscription};

/// Stripe API configuration.
#[derive(Clone)]
pub struct StripeConfig {
    /// Stripe secret API key (sk_live_... or sk_test_...).
    api_key: SecretString,

    /// Base URL for the Stripe API.
    api_base_url: String,

    /// Per-request timeout.
    timeout: Duration,
}

impl StripeConfig {
    /// Creates a new Stripe configuration.
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            api_key: SecretString::new(api_key.into()),
            api_base_url: "https://api.stripe.com".to_string(),
            timeout,
        }
    }

    /// Builds the configuration from the application payment section.
    pub fn from_payment_config(config: &PaymentConfig) -> Self {
        Self::new(config.stripe_api_key.clone(), config.provider_timeout())
    }

    /// Overrides the API base URL (for testing against a stub server).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }
}

/// Stripe implementation of the `PaymentProvider` port.
pub struct StripeClient {
    config: StripeConfig,
    http: reqwest::Client,
}

impl StripeClient {
    /// Creates a new client with the given configuration.
    pub fn new(config: StripeConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        object_id: &str,
    ) -> Result<T, ProviderError> {
        let url = format!("{}{}/{}", self.config.api_base_url, path, object_id);

        let response = self
            .http
            .get(&url)
            .bearer_auth(self.config.api_key.expose_secret())
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(ProviderError::NotFound(object_id.to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn fetch_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, ProviderError> {
        let api: ApiSubscription = self.get_json("/v1/subscriptions", subscription_id).await?;
        api.try_into()
    }

    async fn fetch_customer(&self, customer_id: &str) -> Result<ProviderCustomer, ProviderError> {
        let api: ApiCustomer = self.get_json("/v1/customers", customer_id).await?;
        Ok(api.into())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Wire types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiSubscription {
    id: String,
    customer: String,
    status: String,
    current_period_start: i64,
    current_period_end: i64,
    items: ApiItems,
    latest_invoice: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiItems {
    data: Vec<ApiItem>,
}

#[derive(Debug, Deserialize)]
struct ApiItem {
    price: ApiPrice,
}

#[derive(Debug, Deserialize)]
struct ApiPrice {
    id: String,
}

impl TryFrom<ApiSubscription> for ProviderSubscription {
    type Error = ProviderError;

    fn try_from(api: ApiSubscription) -> Result<Self, Self::Error> {
        let price_id = api
            .items
            .data
            .first()
            .map(|item| item.price.id.clone())
            .ok_or_else(|| ProviderError::Decode("subscription has no items".to_string()))?;

        Ok(ProviderSubscription {
            id: api.id,
            customer: api.customer,
            status: api.status,
            current_period_start: api.current_period_start,
            current_period_end: api.current_period_end,
            price_id,
            latest_invoice: api.latest_invoice,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiCustomer {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl From<ApiCustomer> for ProviderCustomer {
    fn from(api: ApiCustomer) -> Self {
        let user_id = api.metadata.get("userId").cloned();
        ProviderCustomer {
            id: api.id,
            email: api.email,
            user_id,
        }
    }
}
