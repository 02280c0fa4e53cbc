//! Stripe adapters: the live lookup client and an in-memory mock.

mod mock_payment_provider;
mod stripe_client;

pub use mock_payment_provider::MockPaymentProvider;
pub use stripe_client::{StripeClient, StripeConfig};
