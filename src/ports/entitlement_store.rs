//! EntitlementStore port - persistence contract for the reconciliation engine.
//!
//! The store hands out transactions ([`EntitlementTxn`]) that scope every
//! multi-entity mutation of one webhook event: the processed-event claim,
//! the subscription upsert, the class insert, and the reward writes all
//! commit together or not at all.
//!
//! ## Why event ids are recorded inside the transaction
//!
//! The provider delivers at-least-once. Claiming the event id in the same
//! transaction as the event's writes means a crash before commit leaves no
//! claim behind, so redelivery reprocesses cleanly - and a successful commit
//! makes every later delivery of the same event a no-op. This is what keeps
//! the milestone reward from being granted twice when the triggering event
//! is redelivered.
//!
//! Implementations must back the claim with a primary-key constraint so two
//! concurrent deliveries race safely: first insert wins, the loser observes
//! `AlreadyExists`.

use async_trait::async_trait;

use crate::domain::billing::{Subscription, SubscriptionStatus, SubscriptionUpsert};
use crate::domain::classroom::ClassRoom;
use crate::domain::foundation::{DomainError, SubscriptionId, Timestamp, UserId};
use crate::domain::notification::Notification;
use crate::domain::referral::Referral;
use crate::domain::user::User;

/// Result of an insert guarded by a uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Row was inserted (first writer).
    Inserted,
    /// Row already existed (duplicate delivery or lost race).
    AlreadyExists,
}

/// Factory for reconciliation transactions plus the plain read side.
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Opens a transaction for one event's writes.
    async fn begin(&self) -> Result<Box<dyn EntitlementTxn>, DomainError>;

    /// All subscription rows for a user (entitlement read side).
    async fn subscriptions_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<Subscription>, DomainError>;

    /// Looks up a user by id.
    async fn find_user(&self, user_id: &UserId) -> Result<Option<User>, DomainError>;

    /// Trialing subscriptions whose period ends within the next `days` days.
    ///
    /// Used by the trial reminder sweep; exact-day matching happens in the
    /// caller so the query stays a simple range scan.
    async fn find_trialing_ending_within_days(
        &self,
        days: u32,
    ) -> Result<Vec<Subscription>, DomainError>;

    /// Inserts a notification outside any reconciliation transaction.
    ///
    /// The reminder sweep is plain read + fan-out write; one user's failed
    /// insert must not affect the others.
    async fn insert_notification(&self, notification: &Notification) -> Result<(), DomainError>;
}

/// One atomic unit of reconciliation work.
///
/// Dropping a transaction without calling [`commit`](Self::commit) must roll
/// back every write made through it.
#[async_trait]
pub trait EntitlementTxn: Send {
    /// Claims the provider event id for processing.
    ///
    /// Returns `AlreadyExists` when the event was processed before (or is
    /// being processed concurrently), in which case the caller abandons the
    /// transaction.
    async fn claim_event(
        &mut self,
        event_id: &str,
        kind: &str,
    ) -> Result<InsertOutcome, DomainError>;

    /// Reads a user's subscription row, locking it for the duration of the
    /// transaction so concurrent events for the same user serialize.
    async fn find_subscription_for_update(
        &mut self,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, DomainError>;

    /// Inserts or replaces the subscription row keyed by `user_id`.
    async fn upsert_subscription(
        &mut self,
        upsert: &SubscriptionUpsert,
    ) -> Result<Subscription, DomainError>;

    /// Applies a provider-reported status/period change to an existing row.
    ///
    /// Returns the number of rows updated: zero means the user has no
    /// subscription row, which callers treat as a successful no-op.
    async fn update_remote_state(
        &mut self,
        user_id: &UserId,
        status: SubscriptionStatus,
        period_end: Timestamp,
        event_ts: i64,
    ) -> Result<u64, DomainError>;

    /// Inserts a class room, guarded by the unique checkout session id.
    async fn insert_class_room(&mut self, class: &ClassRoom) -> Result<InsertOutcome, DomainError>;

    /// The referral that brought in `user_id`, if any.
    async fn find_referrer_of(&mut self, user_id: &UserId)
        -> Result<Option<Referral>, DomainError>;

    /// Live count of the referrer's successful referrals: distinct referred
    /// users whose subscription is active or trialing with a plan attached.
    async fn count_successful_referrals(
        &mut self,
        referrer_user_id: &UserId,
    ) -> Result<u32, DomainError>;

    /// The referrer's currently active subscription, if any.
    async fn find_active_subscription(
        &mut self,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, DomainError>;

    /// Pushes a subscription's period end out (milestone reward).
    async fn extend_period(
        &mut self,
        subscription_id: &SubscriptionId,
        new_period_end: Timestamp,
    ) -> Result<(), DomainError>;

    /// Inserts a notification within the transaction.
    async fn insert_notification(&mut self, notification: &Notification)
        -> Result<(), DomainError>;

    /// Commits every write made through this transaction.
    async fn commit(self: Box<Self>) -> Result<(), DomainError>;

    /// Explicitly rolls back. Equivalent to dropping, but lets callers log.
    async fn rollback(self: Box<Self>) -> Result<(), DomainError>;
}
