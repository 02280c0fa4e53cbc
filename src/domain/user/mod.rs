//! User domain module.
//!
//! The user identity entity and the entitlement derivation read side.

pub mod entitlement;
mod user;

pub use user::{User, UserRole};
