//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! - `EntitlementStore` / `EntitlementTxn` - persistence plus the atomic
//!   multi-entity apply protocol every webhook event runs in
//! - `PaymentProvider` - the provider's retrieve-by-id lookup API
//! - `PlanCatalog` - provider price id to internal plan mapping
//! - `EmailSink` - fire-and-forget outbound messages

mod email_sink;
mod entitlement_store;
mod payment_provider;
mod plan_catalog;

pub use email_sink::EmailSink;
pub use entitlement_store::{EntitlementStore, EntitlementTxn, InsertOutcome};
pub use payment_provider::{PaymentProvider, ProviderCustomer, ProviderError, ProviderSubscription};
pub use plan_catalog::PlanCatalog;
