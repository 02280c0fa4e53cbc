//! ProcessWebhookHandler - reconciles one payment provider event.
//!
//! The reconciliation pipeline for every inbound webhook:
//!
//! 1. Verify the signature and decode a typed event (pure, no state)
//! 2. Resolve external references through the provider lookup API
//! 3. Open one transaction, claim the event id, apply the transition,
//!    run the referral reward step, commit
//!
//! Every write of step 3 - processed-event claim, subscription upsert,
//! class insert, period extension, notification - commits atomically or
//! not at all. Reward emails are submitted on a detached task only after
//! commit, so mail-sink failures cannot roll back entitlement changes.

use std::sync::Arc;

use crate::domain::billing::{
    CheckoutMode, CheckoutSessionObject, EventKind, EventPayload, SubscriptionEventObject,
    SubscriptionStatus, SubscriptionUpsert, VerifiedEvent, WebhookError, WebhookVerifier,
};
use crate::domain::classroom::ClassRoom;
use crate::domain::foundation::{ClassId, Timestamp, UserId};
use crate::domain::notification::Notification;
use crate::domain::referral::reward;
use crate::ports::{EmailSink, EntitlementStore, EntitlementTxn, InsertOutcome, PaymentProvider, PlanCatalog};

/// Command to process a raw webhook delivery.
#[derive(Debug, Clone)]
pub struct ProcessWebhookCommand {
    /// Raw request body, untouched before signature verification.
    pub payload: Vec<u8>,
    /// Value of the Stripe-Signature header.
    pub signature: String,
}

/// Outcome of webhook processing. Every variant is acknowledged with 2xx.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessWebhookResult {
    /// Paid checkout reconciled; subscription upserted.
    SubscriptionActivated {
        user_id: UserId,
        reward_granted: bool,
    },
    /// Provider-side status/period change applied.
    SubscriptionSynced { user_id: UserId },
    /// One-time class purchase created a class.
    ClassRoomCreated { class_id: ClassId },
    /// Redelivered class purchase; the class already existed.
    ClassRoomAlreadyExists,
    /// Subscription change for a user with no subscription row.
    NoSubscriptionRow,
    /// Event is older than the state already applied.
    SkippedStale,
    /// Event id was claimed by an earlier (or concurrent) delivery.
    AlreadyProcessed,
    /// Event kind or checkout mode the engine does not handle.
    Ignored,
}

/// Handler reconciling provider events against the entitlement store.
pub struct ProcessWebhookHandler {
    verifier: WebhookVerifier,
    store: Arc<dyn EntitlementStore>,
    provider: Arc<dyn PaymentProvider>,
    plans: Arc<dyn PlanCatalog>,
    email: Arc<dyn EmailSink>,
}

/// Reward granted to a referrer during reconciliation.
struct RewardGrant {
    referrer_user_id: UserId,
    total_referrals: u32,
}

impl ProcessWebhookHandler {
    pub fn new(
        verifier: WebhookVerifier,
        store: Arc<dyn EntitlementStore>,
        provider: Arc<dyn PaymentProvider>,
        plans: Arc<dyn PlanCatalog>,
        email: Arc<dyn EmailSink>,
    ) -> Self {
        Self {
            verifier,
            store,
            provider,
            plans,
            email,
        }
    }

    pub async fn handle(
        &self,
        cmd: ProcessWebhookCommand,
    ) -> Result<ProcessWebhookResult, WebhookError> {
        let event = self.verifier.verify_and_decode(&cmd.payload, &cmd.signature)?;

        match (&event.kind, &event.payload) {
            (EventKind::CheckoutSessionCompleted, EventPayload::Checkout(session)) => {
                match session.mode {
                    CheckoutMode::Subscription => {
                        self.reconcile_subscription_checkout(&event, session).await
                    }
                    CheckoutMode::Payment if session.metadata.is_class_purchase() => {
                        self.reconcile_class_purchase(&event, session).await
                    }
                    _ => {
                        tracing::debug!(event_id = %event.id, "checkout mode not handled");
                        Ok(ProcessWebhookResult::Ignored)
                    }
                }
            }
            (EventKind::CustomerSubscriptionUpdated, EventPayload::Subscription(sub)) => {
                self.reconcile_remote_change(&event, sub, false).await
            }
            (EventKind::CustomerSubscriptionDeleted, EventPayload::Subscription(sub)) => {
                self.reconcile_remote_change(&event, sub, true).await
            }
            _ => {
                tracing::debug!(event_id = %event.id, kind = %event.kind.as_str(), "event kind not handled");
                Ok(ProcessWebhookResult::Ignored)
            }
        }
    }

    /// Subscription-mode checkout: re-fetch the live subscription, map the
    /// price onto a plan, upsert, and run the reward step - all in one
    /// transaction.
    async fn reconcile_subscription_checkout(
        &self,
        event: &VerifiedEvent,
        session: &CheckoutSessionObject,
    ) -> Result<ProcessWebhookResult, WebhookError> {
        let user_id = parse_metadata_user_id(session)?;
        let subscription_id = session
            .subscription
            .as_deref()
            .ok_or(WebhookError::MissingMetadata("subscription"))?;

        // The only network call on the reconciliation path; the adapter
        // bounds its latency, and a failure rolls nothing back because the
        // transaction has not opened yet.
        let remote = self.provider.fetch_subscription(subscription_id).await?;

        let plan = self
            .plans
            .find_by_provider_price_id(&remote.price_id)
            .await?
            .ok_or_else(|| WebhookError::PlanNotRecognized(remote.price_id.clone()))?;

        let status = SubscriptionStatus::from_provider(&remote.status).ok_or_else(|| {
            WebhookError::ParseError(format!("unrecognized provider status {:?}", remote.status))
        })?;

        let mut txn = self.store.begin().await?;
        if txn.claim_event(&event.id, event.kind.as_str()).await? == InsertOutcome::AlreadyExists {
            txn.rollback().await?;
            return Ok(ProcessWebhookResult::AlreadyProcessed);
        }

        let upsert = SubscriptionUpsert {
            user_id,
            plan_id: plan.id,
            status,
            current_period_start: Timestamp::from_unix_secs(remote.current_period_start),
            current_period_end: Timestamp::from_unix_secs(remote.current_period_end),
            payment_provider: "stripe".to_string(),
            invoice_id: remote.latest_invoice.clone(),
            provider_event_ts: event.created,
        };
        txn.upsert_subscription(&upsert).await?;

        // Reward recomputation sees the upsert above because it runs in the
        // same transaction; a failure here aborts the activation too.
        let grant = self.apply_referral_reward(txn.as_mut(), &user_id).await?;

        txn.commit().await?;

        let reward_granted = grant.is_some();
        if let Some(grant) = grant {
            tracing::info!(
                referrer = %grant.referrer_user_id,
                total_referrals = grant.total_referrals,
                "referral milestone reward granted"
            );
            self.dispatch_email(
                grant.referrer_user_id,
                "You earned a free month".to_string(),
                format!(
                    "{} friends have joined through your referral code. \
                     Your subscription was extended by one month.",
                    grant.total_referrals
                ),
            );
        }

        tracing::info!(event_id = %event.id, user_id = %user_id, "subscription checkout reconciled");
        Ok(ProcessWebhookResult::SubscriptionActivated {
            user_id,
            reward_granted,
        })
    }

    /// One-time class purchase: insert the class, keyed by the checkout
    /// session id so redelivery cannot create it twice.
    async fn reconcile_class_purchase(
        &self,
        event: &VerifiedEvent,
        session: &CheckoutSessionObject,
    ) -> Result<ProcessWebhookResult, WebhookError> {
        let user_id = parse_metadata_user_id(session)?;
        let name = session
            .metadata
            .class_name
            .clone()
            .unwrap_or_else(|| "New class".to_string());

        let mut txn = self.store.begin().await?;
        if txn.claim_event(&event.id, event.kind.as_str()).await? == InsertOutcome::AlreadyExists {
            txn.rollback().await?;
            return Ok(ProcessWebhookResult::AlreadyProcessed);
        }

        let class = ClassRoom::from_checkout(user_id, name, session.id.clone(), Timestamp::now());
        let outcome = txn.insert_class_room(&class).await?;
        txn.commit().await?;

        match outcome {
            InsertOutcome::Inserted => {
                tracing::info!(event_id = %event.id, class_id = %class.id, "class purchase reconciled");
                Ok(ProcessWebhookResult::ClassRoomCreated { class_id: class.id })
            }
            InsertOutcome::AlreadyExists => Ok(ProcessWebhookResult::ClassRoomAlreadyExists),
        }
    }

    /// `customer.subscription.updated` / `.deleted`: resolve the user via
    /// customer metadata, then apply the event's status and period end if
    /// it is not older than what is already stored.
    async fn reconcile_remote_change(
        &self,
        event: &VerifiedEvent,
        remote: &SubscriptionEventObject,
        deleted: bool,
    ) -> Result<ProcessWebhookResult, WebhookError> {
        let customer = self.provider.fetch_customer(&remote.customer).await?;

        let user_id = match customer.user_id.as_deref().map(str::parse::<UserId>) {
            Some(Ok(user_id)) => user_id,
            _ => {
                // Data-integrity incident: this event can never be applied.
                // Acknowledge to stop redelivery; only the log remains.
                tracing::error!(
                    event_id = %event.id,
                    customer_id = %remote.customer,
                    "provider customer has no usable userId metadata; acknowledging unresolvable event"
                );
                return Err(WebhookError::UnresolvableUser(remote.customer.clone()));
            }
        };

        let status = if deleted {
            SubscriptionStatus::Canceled
        } else {
            SubscriptionStatus::from_provider(&remote.status).ok_or_else(|| {
                WebhookError::ParseError(format!(
                    "unrecognized provider status {:?}",
                    remote.status
                ))
            })?
        };

        let mut txn = self.store.begin().await?;
        if txn.claim_event(&event.id, event.kind.as_str()).await? == InsertOutcome::AlreadyExists {
            txn.rollback().await?;
            return Ok(ProcessWebhookResult::AlreadyProcessed);
        }

        let Some(current) = txn.find_subscription_for_update(&user_id).await? else {
            // No row to update; commit so the claim sticks and redelivery
            // becomes a no-op.
            txn.commit().await?;
            tracing::debug!(event_id = %event.id, user_id = %user_id, "subscription change for user without a row");
            return Ok(ProcessWebhookResult::NoSubscriptionRow);
        };

        if !current.accepts_event_at(event.created) {
            txn.commit().await?;
            tracing::debug!(event_id = %event.id, user_id = %user_id, "stale subscription event skipped");
            return Ok(ProcessWebhookResult::SkippedStale);
        }

        txn.update_remote_state(
            &user_id,
            status,
            Timestamp::from_unix_secs(remote.current_period_end),
            event.created,
        )
        .await?;
        txn.commit().await?;

        tracing::info!(event_id = %event.id, user_id = %user_id, status = status.as_str(), "subscription change reconciled");
        Ok(ProcessWebhookResult::SubscriptionSynced { user_id })
    }

    /// The referral reward step (runs inside the caller's transaction).
    ///
    /// Recomputes the referrer's successful-referral total and, when it
    /// lands on a milestone, extends the referrer's active subscription and
    /// inserts the reward notification. A referrer without an active
    /// subscription receives no reward: there is no period to extend.
    async fn apply_referral_reward(
        &self,
        txn: &mut dyn EntitlementTxn,
        payer: &UserId,
    ) -> Result<Option<RewardGrant>, WebhookError> {
        let Some(referral) = txn.find_referrer_of(payer).await? else {
            return Ok(None);
        };
        let referrer = referral.referrer_user_id;

        let total = txn.count_successful_referrals(&referrer).await?;
        if !reward::newly_earned(total) {
            return Ok(None);
        }

        let Some(active) = txn.find_active_subscription(&referrer).await? else {
            tracing::info!(
                referrer = %referrer,
                total_referrals = total,
                "milestone reached but referrer has no active subscription to extend"
            );
            return Ok(None);
        };

        let new_end = active
            .current_period_end
            .add_days(reward::REWARD_EXTENSION_DAYS);
        txn.extend_period(&active.id, new_end).await?;
        txn.insert_notification(&Notification::referral_reward(
            referrer,
            total,
            Timestamp::now(),
        ))
        .await?;

        Ok(Some(RewardGrant {
            referrer_user_id: referrer,
            total_referrals: total,
        }))
    }

    /// Submits an email on a detached task after commit.
    fn dispatch_email(&self, user_id: UserId, subject: String, body: String) {
        let sink = Arc::clone(&self.email);
        tokio::spawn(async move {
            if let Err(e) = sink.send_to_user(&user_id, &subject, &body).await {
                tracing::warn!(user_id = %user_id, error = %e, "email send failed");
            }
        });
    }
}

fn parse_metadata_user_id(session: &CheckoutSessionObject) -> Result<UserId, WebhookError> {
    session
        .metadata
        .user_id
        .as_deref()
        .ok_or(WebhookError::MissingMetadata("userId"))?
        .parse()
        .map_err(|_| WebhookError::ParseError("metadata userId is not a UUID".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryEntitlementStore;
    use crate::adapters::stripe::MockPaymentProvider;
    use crate::domain::billing::{BillingInterval, Subscription, SubscriptionPlan};
    use crate::domain::foundation::{DomainError, PlanId, SubscriptionId};
    use crate::domain::referral::Referral;
    use crate::ports::{ProviderCustomer, ProviderSubscription};
    use async_trait::async_trait;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    use std::sync::Mutex;

    const SECRET: &str = "whsec_handler_tests";

    // ════════════════════════════════════════════════════════════════════════════
    // Test Infrastructure
    // ════════════════════════════════════════════════════════════════════════════

    struct RecordingEmailSink {
        sent: Mutex<Vec<(UserId, String)>>,
    }

    impl RecordingEmailSink {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EmailSink for RecordingEmailSink {
        async fn send_to_user(
            &self,
            user_id: &UserId,
            subject: &str,
            _body: &str,
        ) -> Result<(), DomainError> {
            self.sent.lock().unwrap().push((*user_id, subject.to_string()));
            Ok(())
        }
    }

    struct StaticPlanCatalog {
        plan: SubscriptionPlan,
    }

    #[async_trait]
    impl PlanCatalog for StaticPlanCatalog {
        async fn find_by_provider_price_id(
            &self,
            price_id: &str,
        ) -> Result<Option<SubscriptionPlan>, DomainError> {
            if price_id == self.plan.provider_price_id {
                Ok(Some(self.plan.clone()))
            } else {
                Ok(None)
            }
        }
    }

    fn plan() -> SubscriptionPlan {
        SubscriptionPlan {
            id: PlanId::new(),
            name: "Plus Monthly".to_string(),
            price_cents: 999,
            interval: BillingInterval::Month,
            provider_price_id: "price_plus_monthly".to_string(),
        }
    }

    fn sign(payload: &str) -> String {
        let timestamp = chrono::Utc::now().timestamp();
        let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, payload).as_bytes());
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    fn command(payload: serde_json::Value) -> ProcessWebhookCommand {
        let body = payload.to_string();
        ProcessWebhookCommand {
            signature: sign(&body),
            payload: body.into_bytes(),
        }
    }

    fn checkout_event(event_id: &str, user_id: &UserId, created: i64) -> serde_json::Value {
        serde_json::json!({
            "id": event_id,
            "type": "checkout.session.completed",
            "created": created,
            "data": {
                "object": {
                    "id": format!("cs_{}", event_id),
                    "mode": "subscription",
                    "customer": "cus_1",
                    "subscription": "sub_1",
                    "metadata": { "userId": user_id.to_string() }
                }
            },
            "livemode": false
        })
    }

    fn class_purchase_event(event_id: &str, user_id: &UserId, session_id: &str) -> serde_json::Value {
        serde_json::json!({
            "id": event_id,
            "type": "checkout.session.completed",
            "created": 1_700_000_000,
            "data": {
                "object": {
                    "id": session_id,
                    "mode": "payment",
                    "customer": "cus_1",
                    "metadata": {
                        "userId": user_id.to_string(),
                        "purchase": "class",
                        "className": "Algebra II"
                    }
                }
            },
            "livemode": false
        })
    }

    fn subscription_event(
        event_id: &str,
        event_type: &str,
        status: &str,
        created: i64,
        period_end: i64,
    ) -> serde_json::Value {
        serde_json::json!({
            "id": event_id,
            "type": event_type,
            "created": created,
            "data": {
                "object": {
                    "id": "sub_1",
                    "customer": "cus_1",
                    "status": status,
                    "current_period_end": period_end
                }
            },
            "livemode": false
        })
    }

    fn provider_subscription(status: &str, period_end: i64) -> ProviderSubscription {
        ProviderSubscription {
            id: "sub_1".to_string(),
            customer: "cus_1".to_string(),
            status: status.to_string(),
            current_period_start: 1_700_000_000,
            current_period_end: period_end,
            price_id: "price_plus_monthly".to_string(),
            latest_invoice: Some("in_1".to_string()),
        }
    }

    struct Fixture {
        handler: ProcessWebhookHandler,
        store: Arc<InMemoryEntitlementStore>,
        email: Arc<RecordingEmailSink>,
    }

    fn fixture(provider: MockPaymentProvider) -> Fixture {
        let store = Arc::new(InMemoryEntitlementStore::new());
        let email = Arc::new(RecordingEmailSink::new());
        let handler = ProcessWebhookHandler::new(
            WebhookVerifier::new(SECRET),
            store.clone(),
            Arc::new(provider),
            Arc::new(StaticPlanCatalog { plan: plan() }),
            email.clone(),
        );
        Fixture {
            handler,
            store,
            email,
        }
    }

    fn paid_active_subscription(user_id: UserId) -> Subscription {
        let now = Timestamp::from_unix_secs(1_700_000_000);
        Subscription {
            id: SubscriptionId::new(),
            user_id,
            plan_id: Some(PlanId::new()),
            status: SubscriptionStatus::Active,
            current_period_start: now,
            current_period_end: now.add_days(20),
            payment_provider: Some("stripe".to_string()),
            invoice_id: None,
            provider_event_ts: Some(1_700_000_000),
            created_at: now,
            updated_at: now,
        }
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Subscription Checkout Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn checkout_upserts_active_subscription() {
        let user_id = UserId::new();
        let mut provider = MockPaymentProvider::new();
        provider.add_subscription(provider_subscription("active", 1_702_592_000));
        let fx = fixture(provider);

        let result = fx
            .handler
            .handle(command(checkout_event("evt_1", &user_id, 1_700_000_100)))
            .await
            .unwrap();

        assert_eq!(
            result,
            ProcessWebhookResult::SubscriptionActivated {
                user_id,
                reward_granted: false
            }
        );

        let subs = fx.store.subscriptions_for_user(&user_id).await.unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].status, SubscriptionStatus::Active);
        assert!(subs[0].plan_id.is_some());
        assert_eq!(subs[0].invoice_id.as_deref(), Some("in_1"));
    }

    #[tokio::test]
    async fn checkout_is_idempotent_under_redelivery() {
        let user_id = UserId::new();
        let mut provider = MockPaymentProvider::new();
        provider.add_subscription(provider_subscription("active", 1_702_592_000));
        let fx = fixture(provider);

        let event = checkout_event("evt_dup", &user_id, 1_700_000_100);
        fx.handler.handle(command(event.clone())).await.unwrap();
        let after_first = fx.store.subscriptions_for_user(&user_id).await.unwrap();

        let second = fx.handler.handle(command(event)).await.unwrap();
        let after_second = fx.store.subscriptions_for_user(&user_id).await.unwrap();

        assert_eq!(second, ProcessWebhookResult::AlreadyProcessed);
        assert_eq!(after_first, after_second);
    }

    #[tokio::test]
    async fn checkout_with_unmapped_price_is_retryable() {
        let user_id = UserId::new();
        let mut provider = MockPaymentProvider::new();
        let mut remote = provider_subscription("active", 1_702_592_000);
        remote.price_id = "price_unknown".to_string();
        provider.add_subscription(remote);
        let fx = fixture(provider);

        let result = fx
            .handler
            .handle(command(checkout_event("evt_2", &user_id, 1_700_000_100)))
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, WebhookError::PlanNotRecognized(_)));
        assert!(err.is_retryable());
        // Nothing was written: the event must redeliver and succeed later.
        assert!(fx.store.subscriptions_for_user(&user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn checkout_with_trialing_subscription_keeps_trial_status() {
        let user_id = UserId::new();
        let mut provider = MockPaymentProvider::new();
        provider.add_subscription(provider_subscription("trialing", 1_702_592_000));
        let fx = fixture(provider);

        fx.handler
            .handle(command(checkout_event("evt_3", &user_id, 1_700_000_100)))
            .await
            .unwrap();

        let subs = fx.store.subscriptions_for_user(&user_id).await.unwrap();
        assert_eq!(subs[0].status, SubscriptionStatus::Trialing);
        assert!(subs[0].plan_id.is_some());
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Referral Reward Tests
    // ════════════════════════════════════════════════════════════════════════════

    /// Seeds a referrer with `existing` already-converted referrals and one
    /// more referred user whose checkout is about to arrive.
    async fn seed_referrals(
        store: &InMemoryEntitlementStore,
        referrer: UserId,
        existing: usize,
    ) -> UserId {
        store.seed_subscription(paid_active_subscription(referrer)).await;
        for _ in 0..existing {
            let converted = UserId::new();
            store
                .seed_referral(Referral::new(referrer, converted, Timestamp::now()))
                .await;
            store.seed_subscription(paid_active_subscription(converted)).await;
        }
        let next = UserId::new();
        store
            .seed_referral(Referral::new(referrer, next, Timestamp::now()))
            .await;
        next
    }

    #[tokio::test]
    async fn fifth_referral_extends_referrer_by_thirty_days() {
        let referrer = UserId::new();
        let mut provider = MockPaymentProvider::new();
        provider.add_subscription(provider_subscription("active", 1_702_592_000));
        let fx = fixture(provider);

        let fifth = seed_referrals(&fx.store, referrer, 4).await;
        let before = fx.store.subscriptions_for_user(&referrer).await.unwrap()[0]
            .current_period_end;

        let result = fx
            .handler
            .handle(command(checkout_event("evt_r5", &fifth, 1_700_000_100)))
            .await
            .unwrap();

        assert_eq!(
            result,
            ProcessWebhookResult::SubscriptionActivated {
                user_id: fifth,
                reward_granted: true
            }
        );

        let after = fx.store.subscriptions_for_user(&referrer).await.unwrap()[0]
            .current_period_end;
        assert_eq!(after.duration_since(&before).num_days(), 30);

        let notifications = fx.store.notifications_for_user(&referrer).await;
        assert_eq!(notifications.len(), 1);
    }

    #[tokio::test]
    async fn fourth_referral_grants_nothing() {
        let referrer = UserId::new();
        let mut provider = MockPaymentProvider::new();
        provider.add_subscription(provider_subscription("active", 1_702_592_000));
        let fx = fixture(provider);

        let fourth = seed_referrals(&fx.store, referrer, 3).await;
        let before = fx.store.subscriptions_for_user(&referrer).await.unwrap()[0]
            .current_period_end;

        let result = fx
            .handler
            .handle(command(checkout_event("evt_r4", &fourth, 1_700_000_100)))
            .await
            .unwrap();

        assert_eq!(
            result,
            ProcessWebhookResult::SubscriptionActivated {
                user_id: fourth,
                reward_granted: false
            }
        );
        let after = fx.store.subscriptions_for_user(&referrer).await.unwrap()[0]
            .current_period_end;
        assert_eq!(before, after);
        assert!(fx.store.notifications_for_user(&referrer).await.is_empty());
    }

    #[tokio::test]
    async fn redelivered_milestone_event_grants_exactly_one_reward() {
        let referrer = UserId::new();
        let mut provider = MockPaymentProvider::new();
        provider.add_subscription(provider_subscription("active", 1_702_592_000));
        let fx = fixture(provider);

        let fifth = seed_referrals(&fx.store, referrer, 4).await;
        let before = fx.store.subscriptions_for_user(&referrer).await.unwrap()[0]
            .current_period_end;

        let event = checkout_event("evt_r5_dup", &fifth, 1_700_000_100);
        fx.handler.handle(command(event.clone())).await.unwrap();
        let second = fx.handler.handle(command(event)).await.unwrap();

        assert_eq!(second, ProcessWebhookResult::AlreadyProcessed);
        let after = fx.store.subscriptions_for_user(&referrer).await.unwrap()[0]
            .current_period_end;
        assert_eq!(after.duration_since(&before).num_days(), 30);
        assert_eq!(fx.store.notifications_for_user(&referrer).await.len(), 1);
    }

    #[tokio::test]
    async fn referrer_without_active_subscription_gets_no_reward() {
        let referrer = UserId::new();
        let mut provider = MockPaymentProvider::new();
        provider.add_subscription(provider_subscription("active", 1_702_592_000));
        let fx = fixture(provider);

        // Referrer has converted referrals but no subscription row at all.
        for _ in 0..4 {
            let converted = UserId::new();
            fx.store
                .seed_referral(Referral::new(referrer, converted, Timestamp::now()))
                .await;
            fx.store.seed_subscription(paid_active_subscription(converted)).await;
        }
        let fifth = UserId::new();
        fx.store
            .seed_referral(Referral::new(referrer, fifth, Timestamp::now()))
            .await;

        let result = fx
            .handler
            .handle(command(checkout_event("evt_r5_na", &fifth, 1_700_000_100)))
            .await
            .unwrap();

        assert_eq!(
            result,
            ProcessWebhookResult::SubscriptionActivated {
                user_id: fifth,
                reward_granted: false
            }
        );
        assert!(fx.store.notifications_for_user(&referrer).await.is_empty());
    }

    #[tokio::test]
    async fn system_trial_referrals_do_not_count() {
        let referrer = UserId::new();
        let mut provider = MockPaymentProvider::new();
        provider.add_subscription(provider_subscription("active", 1_702_592_000));
        let fx = fixture(provider);

        fx.store.seed_subscription(paid_active_subscription(referrer)).await;
        // Four referred users on bare system trials: none count.
        for _ in 0..4 {
            let trial_user = UserId::new();
            fx.store
                .seed_referral(Referral::new(referrer, trial_user, Timestamp::now()))
                .await;
            fx.store
                .seed_subscription(Subscription::system_trial(
                    SubscriptionId::new(),
                    trial_user,
                    Timestamp::from_unix_secs(1_700_000_000),
                ))
                .await;
        }
        let fifth = UserId::new();
        fx.store
            .seed_referral(Referral::new(referrer, fifth, Timestamp::now()))
            .await;

        let result = fx
            .handler
            .handle(command(checkout_event("evt_trials", &fifth, 1_700_000_100)))
            .await
            .unwrap();

        // Live total is 1 (only the paying fifth user), so no milestone.
        assert_eq!(
            result,
            ProcessWebhookResult::SubscriptionActivated {
                user_id: fifth,
                reward_granted: false
            }
        );
    }

    #[tokio::test]
    async fn reward_email_is_dispatched_after_commit() {
        let referrer = UserId::new();
        let mut provider = MockPaymentProvider::new();
        provider.add_subscription(provider_subscription("active", 1_702_592_000));
        let fx = fixture(provider);

        let fifth = seed_referrals(&fx.store, referrer, 4).await;
        fx.handler
            .handle(command(checkout_event("evt_mail", &fifth, 1_700_000_100)))
            .await
            .unwrap();

        // The email runs on a detached task; give it a moment.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let sent = fx.email.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, referrer);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Class Purchase Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn class_purchase_creates_class_with_join_code() {
        let teacher = UserId::new();
        let fx = fixture(MockPaymentProvider::new());

        let result = fx
            .handler
            .handle(command(class_purchase_event("evt_c1", &teacher, "cs_class_1")))
            .await
            .unwrap();

        assert!(matches!(result, ProcessWebhookResult::ClassRoomCreated { .. }));
        let classes = fx.store.class_rooms().await;
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].teacher_user_id, teacher);
        assert_eq!(classes[0].name, "Algebra II");
        assert_eq!(classes[0].join_code.len(), 8);
    }

    #[tokio::test]
    async fn duplicate_class_purchase_session_creates_one_class() {
        let teacher = UserId::new();
        let fx = fixture(MockPaymentProvider::new());

        // Two distinct event ids for the same checkout session.
        fx.handler
            .handle(command(class_purchase_event("evt_c2a", &teacher, "cs_class_2")))
            .await
            .unwrap();
        let second = fx
            .handler
            .handle(command(class_purchase_event("evt_c2b", &teacher, "cs_class_2")))
            .await
            .unwrap();

        assert_eq!(second, ProcessWebhookResult::ClassRoomAlreadyExists);
        assert_eq!(fx.store.class_rooms().await.len(), 1);
    }

    #[tokio::test]
    async fn plain_payment_checkout_is_ignored() {
        let user = UserId::new();
        let fx = fixture(MockPaymentProvider::new());
        let mut event = class_purchase_event("evt_c3", &user, "cs_other");
        event["data"]["object"]["metadata"]
            .as_object_mut()
            .unwrap()
            .remove("purchase");

        let result = fx.handler.handle(command(event)).await.unwrap();
        assert_eq!(result, ProcessWebhookResult::Ignored);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Remote Subscription Change Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn update_event_applies_status_and_period() {
        let user_id = UserId::new();
        let mut provider = MockPaymentProvider::new();
        provider.add_customer(ProviderCustomer {
            id: "cus_1".to_string(),
            email: Some("u@example.com".to_string()),
            user_id: Some(user_id.to_string()),
        });
        let fx = fixture(provider);
        fx.store.seed_subscription(paid_active_subscription(user_id)).await;

        let result = fx
            .handler
            .handle(command(subscription_event(
                "evt_u1",
                "customer.subscription.updated",
                "past_due",
                1_700_000_500,
                1_703_000_000,
            )))
            .await
            .unwrap();

        assert_eq!(result, ProcessWebhookResult::SubscriptionSynced { user_id });
        let subs = fx.store.subscriptions_for_user(&user_id).await.unwrap();
        assert_eq!(subs[0].status, SubscriptionStatus::PastDue);
        assert_eq!(subs[0].current_period_end.as_unix_secs(), 1_703_000_000);
    }

    #[tokio::test]
    async fn deleted_event_cancels_subscription() {
        let user_id = UserId::new();
        let mut provider = MockPaymentProvider::new();
        provider.add_customer(ProviderCustomer {
            id: "cus_1".to_string(),
            email: None,
            user_id: Some(user_id.to_string()),
        });
        let fx = fixture(provider);
        fx.store.seed_subscription(paid_active_subscription(user_id)).await;

        fx.handler
            .handle(command(subscription_event(
                "evt_d1",
                "customer.subscription.deleted",
                "canceled",
                1_700_000_500,
                1_703_000_000,
            )))
            .await
            .unwrap();

        let subs = fx.store.subscriptions_for_user(&user_id).await.unwrap();
        assert_eq!(subs[0].status, SubscriptionStatus::Canceled);
    }

    #[tokio::test]
    async fn deleted_event_without_row_is_a_noop() {
        let user_id = UserId::new();
        let mut provider = MockPaymentProvider::new();
        provider.add_customer(ProviderCustomer {
            id: "cus_1".to_string(),
            email: None,
            user_id: Some(user_id.to_string()),
        });
        let fx = fixture(provider);

        let result = fx
            .handler
            .handle(command(subscription_event(
                "evt_d2",
                "customer.subscription.deleted",
                "canceled",
                1_700_000_500,
                1_703_000_000,
            )))
            .await
            .unwrap();

        assert_eq!(result, ProcessWebhookResult::NoSubscriptionRow);
        assert!(fx.store.subscriptions_for_user(&user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_update_does_not_regress_state() {
        let user_id = UserId::new();
        let mut provider = MockPaymentProvider::new();
        provider.add_customer(ProviderCustomer {
            id: "cus_1".to_string(),
            email: None,
            user_id: Some(user_id.to_string()),
        });
        let fx = fixture(provider);
        // Row last touched by an event at t=1_700_000_000.
        fx.store.seed_subscription(paid_active_subscription(user_id)).await;

        let result = fx
            .handler
            .handle(command(subscription_event(
                "evt_stale",
                "customer.subscription.updated",
                "canceled",
                1_699_000_000, // older than the applied event
                1_650_000_000,
            )))
            .await
            .unwrap();

        assert_eq!(result, ProcessWebhookResult::SkippedStale);
        let subs = fx.store.subscriptions_for_user(&user_id).await.unwrap();
        assert_eq!(subs[0].status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn missing_customer_metadata_is_fatal_but_acknowledged() {
        let mut provider = MockPaymentProvider::new();
        provider.add_customer(ProviderCustomer {
            id: "cus_1".to_string(),
            email: None,
            user_id: None,
        });
        let fx = fixture(provider);

        let result = fx
            .handler
            .handle(command(subscription_event(
                "evt_fatal",
                "customer.subscription.updated",
                "active",
                1_700_000_500,
                1_703_000_000,
            )))
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, WebhookError::UnresolvableUser(_)));
        // Acknowledged: 2xx stops redelivery of an event that can never succeed.
        assert_eq!(err.status_code(), axum::http::StatusCode::OK);
        // Zero writes, including the event claim.
        assert_eq!(fx.store.processed_event_count().await, 0);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Verification and Dispatch Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn bad_signature_is_rejected_before_any_write() {
        let user_id = UserId::new();
        let fx = fixture(MockPaymentProvider::new());
        let body = checkout_event("evt_bad", &user_id, 1_700_000_100).to_string();

        let result = fx
            .handler
            .handle(ProcessWebhookCommand {
                payload: body.into_bytes(),
                signature: format!("t={},v1={}", chrono::Utc::now().timestamp(), "ab".repeat(32)),
            })
            .await;

        assert!(matches!(result, Err(WebhookError::InvalidSignature)));
        assert_eq!(fx.store.processed_event_count().await, 0);
    }

    #[tokio::test]
    async fn unhandled_event_kind_is_ignored() {
        let fx = fixture(MockPaymentProvider::new());
        let payload = serde_json::json!({
            "id": "evt_other",
            "type": "invoice.paid",
            "created": 1_700_000_000,
            "data": { "object": { "id": "in_1" } },
            "livemode": false
        });

        let result = fx.handler.handle(command(payload)).await.unwrap();
        assert_eq!(result, ProcessWebhookResult::Ignored);
    }
}
