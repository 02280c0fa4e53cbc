//! In-memory implementation of the entitlement store.
//!
//! Transactional test double: `begin` snapshots the whole store, writes go
//! to the snapshot, and `commit` swaps it back in. Dropping a transaction
//! discards the snapshot, which gives rollback-on-drop exactly like the
//! PostgreSQL adapter. Commits serialize on one lock; concurrency fidelity
//! is not a goal here.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::billing::{Subscription, SubscriptionStatus, SubscriptionUpsert};
use crate::domain::classroom::ClassRoom;
use crate::domain::foundation::{DomainError, SubscriptionId, Timestamp, UserId};
use crate::domain::notification::Notification;
use crate::domain::referral::Referral;
use crate::domain::user::User;
use crate::ports::{EntitlementStore, EntitlementTxn, InsertOutcome};

#[derive(Debug, Default, Clone)]
struct State {
    users: Vec<User>,
    subscriptions: Vec<Subscription>,
    referrals: Vec<Referral>,
    notifications: Vec<Notification>,
    class_rooms: Vec<ClassRoom>,
    processed_events: HashSet<String>,
}

/// In-memory entitlement store for unit and integration tests.
#[derive(Default)]
pub struct InMemoryEntitlementStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryEntitlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a user row.
    pub async fn seed_user(&self, user: User) {
        self.state.lock().await.users.push(user);
    }

    /// Seeds a subscription row.
    pub async fn seed_subscription(&self, subscription: Subscription) {
        self.state.lock().await.subscriptions.push(subscription);
    }

    /// Seeds a referral link.
    pub async fn seed_referral(&self, referral: Referral) {
        self.state.lock().await.referrals.push(referral);
    }

    /// All notifications persisted for a user.
    pub async fn notifications_for_user(&self, user_id: &UserId) -> Vec<Notification> {
        self.state
            .lock()
            .await
            .notifications
            .iter()
            .filter(|n| &n.user_id == user_id)
            .cloned()
            .collect()
    }

    /// All class rooms.
    pub async fn class_rooms(&self) -> Vec<ClassRoom> {
        self.state.lock().await.class_rooms.clone()
    }

    /// Number of claimed webhook event ids.
    pub async fn processed_event_count(&self) -> usize {
        self.state.lock().await.processed_events.len()
    }
}

#[async_trait]
impl EntitlementStore for InMemoryEntitlementStore {
    async fn begin(&self) -> Result<Box<dyn EntitlementTxn>, DomainError> {
        let working = self.state.lock().await.clone();
        Ok(Box::new(InMemoryTxn {
            shared: Arc::clone(&self.state),
            working,
        }))
    }

    async fn subscriptions_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<Subscription>, DomainError> {
        Ok(self
            .state
            .lock()
            .await
            .subscriptions
            .iter()
            .filter(|s| &s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_user(&self, user_id: &UserId) -> Result<Option<User>, DomainError> {
        Ok(self
            .state
            .lock()
            .await
            .users
            .iter()
            .find(|u| &u.id == user_id)
            .cloned())
    }

    async fn find_trialing_ending_within_days(
        &self,
        days: u32,
    ) -> Result<Vec<Subscription>, DomainError> {
        let cutoff = Timestamp::now().add_days(i64::from(days));
        Ok(self
            .state
            .lock()
            .await
            .subscriptions
            .iter()
            .filter(|s| {
                s.status == SubscriptionStatus::Trialing && s.current_period_end <= cutoff
            })
            .cloned()
            .collect())
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<(), DomainError> {
        self.state
            .lock()
            .await
            .notifications
            .push(notification.clone());
        Ok(())
    }
}

struct InMemoryTxn {
    shared: Arc<Mutex<State>>,
    working: State,
}

#[async_trait]
impl EntitlementTxn for InMemoryTxn {
    async fn claim_event(
        &mut self,
        event_id: &str,
        _kind: &str,
    ) -> Result<InsertOutcome, DomainError> {
        if self.working.processed_events.insert(event_id.to_string()) {
            Ok(InsertOutcome::Inserted)
        } else {
            Ok(InsertOutcome::AlreadyExists)
        }
    }

    async fn find_subscription_for_update(
        &mut self,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, DomainError> {
        Ok(self
            .working
            .subscriptions
            .iter()
            .find(|s| &s.user_id == user_id)
            .cloned())
    }

    async fn upsert_subscription(
        &mut self,
        upsert: &SubscriptionUpsert,
    ) -> Result<Subscription, DomainError> {
        let now = Timestamp::now();
        if let Some(existing) = self
            .working
            .subscriptions
            .iter_mut()
            .find(|s| s.user_id == upsert.user_id)
        {
            existing.plan_id = Some(upsert.plan_id);
            existing.status = upsert.status;
            existing.current_period_start = upsert.current_period_start;
            existing.current_period_end = upsert.current_period_end;
            existing.payment_provider = Some(upsert.payment_provider.clone());
            existing.invoice_id = upsert.invoice_id.clone();
            existing.provider_event_ts = Some(upsert.provider_event_ts);
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let subscription = Subscription {
            id: SubscriptionId::new(),
            user_id: upsert.user_id,
            plan_id: Some(upsert.plan_id),
            status: upsert.status,
            current_period_start: upsert.current_period_start,
            current_period_end: upsert.current_period_end,
            payment_provider: Some(upsert.payment_provider.clone()),
            invoice_id: upsert.invoice_id.clone(),
            provider_event_ts: Some(upsert.provider_event_ts),
            created_at: now,
            updated_at: now,
        };
        self.working.subscriptions.push(subscription.clone());
        Ok(subscription)
    }

    async fn update_remote_state(
        &mut self,
        user_id: &UserId,
        status: SubscriptionStatus,
        period_end: Timestamp,
        event_ts: i64,
    ) -> Result<u64, DomainError> {
        match self
            .working
            .subscriptions
            .iter_mut()
            .find(|s| &s.user_id == user_id)
        {
            Some(subscription) => {
                subscription.status = status;
                subscription.current_period_end = period_end;
                subscription.provider_event_ts = Some(event_ts);
                subscription.updated_at = Timestamp::now();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn insert_class_room(&mut self, class: &ClassRoom) -> Result<InsertOutcome, DomainError> {
        if self
            .working
            .class_rooms
            .iter()
            .any(|c| c.checkout_session_id == class.checkout_session_id)
        {
            return Ok(InsertOutcome::AlreadyExists);
        }
        self.working.class_rooms.push(class.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn find_referrer_of(
        &mut self,
        user_id: &UserId,
    ) -> Result<Option<Referral>, DomainError> {
        Ok(self
            .working
            .referrals
            .iter()
            .find(|r| &r.referred_user_id == user_id)
            .cloned())
    }

    async fn count_successful_referrals(
        &mut self,
        referrer_user_id: &UserId,
    ) -> Result<u32, DomainError> {
        let count = self
            .working
            .referrals
            .iter()
            .filter(|r| &r.referrer_user_id == referrer_user_id)
            .filter(|r| {
                self.working
                    .subscriptions
                    .iter()
                    .any(|s| s.user_id == r.referred_user_id && s.counts_as_successful_referral())
            })
            .count();
        Ok(count as u32)
    }

    async fn find_active_subscription(
        &mut self,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, DomainError> {
        Ok(self
            .working
            .subscriptions
            .iter()
            .filter(|s| &s.user_id == user_id && s.status == SubscriptionStatus::Active)
            .max_by_key(|s| s.current_period_start)
            .cloned())
    }

    async fn extend_period(
        &mut self,
        subscription_id: &SubscriptionId,
        new_period_end: Timestamp,
    ) -> Result<(), DomainError> {
        if let Some(subscription) = self
            .working
            .subscriptions
            .iter_mut()
            .find(|s| &s.id == subscription_id)
        {
            subscription.current_period_end = new_period_end;
            subscription.updated_at = Timestamp::now();
        }
        Ok(())
    }

    async fn insert_notification(
        &mut self,
        notification: &Notification,
    ) -> Result<(), DomainError> {
        self.working.notifications.push(notification.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DomainError> {
        *self.shared.lock().await = self.working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DomainError> {
        Ok(())
    }
}
