//! Foundation module - shared value objects for the domain layer.
//!
//! Strongly-typed identifiers, UTC timestamps, and the standard domain
//! error type used across aggregates and ports.

mod errors;
mod ids;
mod timestamp;

pub use errors::{DomainError, ErrorCode};
pub use ids::{ClassId, NotificationId, PlanId, ReferralId, SubscriptionId, UserId};
pub use timestamp::Timestamp;
