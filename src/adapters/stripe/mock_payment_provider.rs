//! In-memory payment provider for tests and local development.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::ports::{PaymentProvider, ProviderCustomer, ProviderError, ProviderSubscription};

/// Mock provider serving canned subscription and customer objects.
#[derive(Default)]
pub struct MockPaymentProvider {
    subscriptions: HashMap<String, ProviderSubscription>,
    customers: HashMap<String, ProviderCustomer>,
}

impl MockPaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscription object, keyed by its id.
    pub fn add_subscription(&mut self, subscription: ProviderSubscription) {
        self.subscriptions
            .insert(subscription.id.clone(), subscription);
    }

    /// Registers a customer object, keyed by its id.
    pub fn add_customer(&mut self, customer: ProviderCustomer) {
        self.customers.insert(customer.id.clone(), customer);
    }
}

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    async fn fetch_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, ProviderError> {
        self.subscriptions
            .get(subscription_id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(subscription_id.to_string()))
    }

    async fn fetch_customer(&self, customer_id: &str) -> Result<ProviderCustomer, ProviderError> {
        self.customers
            .get(customer_id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(customer_id.to_string()))
    }
}
