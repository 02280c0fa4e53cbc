//! PostgreSQL adapters.

mod entitlement_store;
mod plan_catalog;

pub use entitlement_store::PostgresEntitlementStore;
pub use plan_catalog::PostgresPlanCatalog;
