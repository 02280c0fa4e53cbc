//! End-to-end reconciliation tests.
//!
//! Drives the webhook pipeline through the real signature verifier against
//! the in-memory store and mock provider: signed payloads in, entitlement
//! state out.

use std::sync::Arc;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use studyhall::adapters::memory::InMemoryEntitlementStore;
use studyhall::adapters::stripe::MockPaymentProvider;
use studyhall::application::handlers::billing::{
    GetEntitlementHandler, GetEntitlementQuery, ProcessWebhookCommand, ProcessWebhookHandler,
    ProcessWebhookResult,
};
use studyhall::domain::billing::{
    BillingInterval, SubscriptionPlan, SubscriptionStatus, WebhookError, WebhookVerifier,
};
use studyhall::domain::foundation::{DomainError, PlanId, Timestamp, UserId};
use studyhall::domain::referral::Referral;
use studyhall::domain::user::{User, UserRole};
use studyhall::ports::{
    EmailSink, EntitlementStore, PlanCatalog, ProviderCustomer, ProviderSubscription,
};

const SECRET: &str = "whsec_integration_tests";
const PRICE_ID: &str = "price_plus_monthly";

// ────────────────────────────────────────────────────────────────────────────
// Harness
// ────────────────────────────────────────────────────────────────────────────

struct NullEmailSink;

#[async_trait]
impl EmailSink for NullEmailSink {
    async fn send_to_user(
        &self,
        _user_id: &UserId,
        _subject: &str,
        _body: &str,
    ) -> Result<(), DomainError> {
        Ok(())
    }
}

struct SinglePlanCatalog {
    plan: SubscriptionPlan,
}

#[async_trait]
impl PlanCatalog for SinglePlanCatalog {
    async fn find_by_provider_price_id(
        &self,
        price_id: &str,
    ) -> Result<Option<SubscriptionPlan>, DomainError> {
        Ok((price_id == self.plan.provider_price_id).then(|| self.plan.clone()))
    }
}

struct Harness {
    handler: ProcessWebhookHandler,
    store: Arc<InMemoryEntitlementStore>,
}

fn harness(provider: MockPaymentProvider) -> Harness {
    let store = Arc::new(InMemoryEntitlementStore::new());
    let plan = SubscriptionPlan {
        id: PlanId::new(),
        name: "Studyhall Plus Monthly".to_string(),
        price_cents: 999,
        interval: BillingInterval::Month,
        provider_price_id: PRICE_ID.to_string(),
    };
    let handler = ProcessWebhookHandler::new(
        WebhookVerifier::new(SECRET),
        store.clone(),
        Arc::new(provider),
        Arc::new(SinglePlanCatalog { plan }),
        Arc::new(NullEmailSink),
    );
    Harness { handler, store }
}

fn signed_command(payload: serde_json::Value) -> ProcessWebhookCommand {
    let body = payload.to_string();
    let timestamp = chrono::Utc::now().timestamp();
    let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(format!("{}.{}", timestamp, body).as_bytes());
    let signature = format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    );
    ProcessWebhookCommand {
        payload: body.into_bytes(),
        signature,
    }
}

fn checkout_payload(event_id: &str, user_id: &UserId, subscription_id: &str) -> serde_json::Value {
    serde_json::json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "created": 1_700_000_100,
        "data": {
            "object": {
                "id": format!("cs_{}", event_id),
                "mode": "subscription",
                "customer": format!("cus_{}", user_id),
                "subscription": subscription_id,
                "metadata": { "userId": user_id.to_string() }
            }
        },
        "livemode": false
    })
}

fn provider_subscription(id: &str, user_id: &UserId) -> ProviderSubscription {
    ProviderSubscription {
        id: id.to_string(),
        customer: format!("cus_{}", user_id),
        status: "active".to_string(),
        current_period_start: 1_700_000_000,
        current_period_end: 1_702_592_000,
        price_id: PRICE_ID.to_string(),
        latest_invoice: Some(format!("in_{}", id)),
    }
}

fn referrer_user(code: &str) -> User {
    User {
        id: UserId::new(),
        email: "referrer@example.com".to_string(),
        role: UserRole::Student,
        referral_code: code.to_string(),
        is_permanent_free: false,
        created_at: Timestamp::from_unix_secs(1_690_000_000),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Milestone scenario
// ────────────────────────────────────────────────────────────────────────────

/// Referrer R holds code ABC123; five users registered with it convert one
/// by one. After the fifth checkout, R's period end has advanced by exactly
/// thirty days and R has exactly one reward notification.
#[tokio::test]
async fn five_conversions_earn_the_referrer_one_month() {
    let referrer = referrer_user("ABC123");
    let referred: Vec<UserId> = (0..5).map(|_| UserId::new()).collect();

    let mut provider = MockPaymentProvider::new();
    for (i, user_id) in referred.iter().enumerate() {
        provider.add_subscription(provider_subscription(&format!("sub_{}", i), user_id));
    }
    // R's own paid subscription, the one the reward extends.
    provider.add_subscription(provider_subscription("sub_r", &referrer.id));
    let h = harness(provider);

    h.store.seed_user(referrer.clone()).await;
    // Activate R through a checkout as well, so the store state is entirely
    // webhook-produced.
    h.handler
        .handle(signed_command(checkout_payload("evt_r", &referrer.id, "sub_r")))
        .await
        .unwrap();
    for user_id in &referred {
        h.store
            .seed_referral(Referral::new(referrer.id, *user_id, Timestamp::now()))
            .await;
    }

    let before = h.store.subscriptions_for_user(&referrer.id).await.unwrap()[0]
        .current_period_end;

    for (i, user_id) in referred.iter().enumerate() {
        let result = h
            .handler
            .handle(signed_command(checkout_payload(
                &format!("evt_{}", i),
                user_id,
                &format!("sub_{}", i),
            )))
            .await
            .unwrap();

        let expected_reward = i == 4;
        assert_eq!(
            result,
            ProcessWebhookResult::SubscriptionActivated {
                user_id: *user_id,
                reward_granted: expected_reward
            },
            "conversion {} produced the wrong outcome",
            i
        );
    }

    let after = h.store.subscriptions_for_user(&referrer.id).await.unwrap()[0]
        .current_period_end;
    assert_eq!(after.duration_since(&before).num_days(), 30);

    let notifications = h.store.notifications_for_user(&referrer.id).await;
    assert_eq!(notifications.len(), 1);
    assert!(notifications[0].message.contains('5'));
}

#[tokio::test]
async fn redelivering_every_event_changes_nothing() {
    let referrer = referrer_user("XYZ789");
    let referred: Vec<UserId> = (0..5).map(|_| UserId::new()).collect();

    let mut provider = MockPaymentProvider::new();
    for (i, user_id) in referred.iter().enumerate() {
        provider.add_subscription(provider_subscription(&format!("sub_{}", i), user_id));
    }
    provider.add_subscription(provider_subscription("sub_r", &referrer.id));
    let h = harness(provider);

    h.store.seed_user(referrer.clone()).await;
    h.handler
        .handle(signed_command(checkout_payload("evt_r", &referrer.id, "sub_r")))
        .await
        .unwrap();
    for user_id in &referred {
        h.store
            .seed_referral(Referral::new(referrer.id, *user_id, Timestamp::now()))
            .await;
    }

    let mut commands = Vec::new();
    for (i, user_id) in referred.iter().enumerate() {
        let payload = checkout_payload(&format!("evt_{}", i), user_id, &format!("sub_{}", i));
        commands.push(payload.clone());
        h.handler.handle(signed_command(payload)).await.unwrap();
    }

    let snapshot = h.store.subscriptions_for_user(&referrer.id).await.unwrap();

    // Redeliver everything, twice.
    for payload in commands.iter().chain(commands.iter()) {
        let result = h.handler.handle(signed_command(payload.clone())).await.unwrap();
        assert_eq!(result, ProcessWebhookResult::AlreadyProcessed);
    }

    assert_eq!(
        h.store.subscriptions_for_user(&referrer.id).await.unwrap(),
        snapshot
    );
    assert_eq!(h.store.notifications_for_user(&referrer.id).await.len(), 1);
}

// ────────────────────────────────────────────────────────────────────────────
// Lifecycle and fatal paths
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn full_lifecycle_checkout_update_delete() {
    let user_id = UserId::new();
    let mut provider = MockPaymentProvider::new();
    provider.add_subscription(provider_subscription("sub_l", &user_id));
    provider.add_customer(ProviderCustomer {
        id: format!("cus_{}", user_id),
        email: Some("student@example.com".to_string()),
        user_id: Some(user_id.to_string()),
    });
    let h = harness(provider);

    // 1. Checkout activates.
    h.handler
        .handle(signed_command(checkout_payload("evt_co", &user_id, "sub_l")))
        .await
        .unwrap();

    // 2. Payment failure flips to past_due.
    let update = serde_json::json!({
        "id": "evt_pd",
        "type": "customer.subscription.updated",
        "created": 1_700_000_200,
        "data": {
            "object": {
                "id": "sub_l",
                "customer": format!("cus_{}", user_id),
                "status": "past_due",
                "current_period_end": 1_702_592_000
            }
        },
        "livemode": false
    });
    h.handler.handle(signed_command(update)).await.unwrap();
    let subs = h.store.subscriptions_for_user(&user_id).await.unwrap();
    assert_eq!(subs[0].status, SubscriptionStatus::PastDue);

    // 3. Deletion cancels.
    let delete = serde_json::json!({
        "id": "evt_del",
        "type": "customer.subscription.deleted",
        "created": 1_700_000_300,
        "data": {
            "object": {
                "id": "sub_l",
                "customer": format!("cus_{}", user_id),
                "status": "canceled",
                "current_period_end": 1_702_592_000
            }
        },
        "livemode": false
    });
    h.handler.handle(signed_command(delete)).await.unwrap();
    let subs = h.store.subscriptions_for_user(&user_id).await.unwrap();
    assert_eq!(subs[0].status, SubscriptionStatus::Canceled);

    // 4. A stale update from before the deletion cannot resurrect the row.
    let stale = serde_json::json!({
        "id": "evt_stale",
        "type": "customer.subscription.updated",
        "created": 1_700_000_250,
        "data": {
            "object": {
                "id": "sub_l",
                "customer": format!("cus_{}", user_id),
                "status": "active",
                "current_period_end": 1_702_592_000
            }
        },
        "livemode": false
    });
    let result = h.handler.handle(signed_command(stale)).await.unwrap();
    assert_eq!(result, ProcessWebhookResult::SkippedStale);
    let subs = h.store.subscriptions_for_user(&user_id).await.unwrap();
    assert_eq!(subs[0].status, SubscriptionStatus::Canceled);
}

#[tokio::test]
async fn unresolvable_customer_is_acknowledged_with_zero_writes() {
    let mut provider = MockPaymentProvider::new();
    provider.add_customer(ProviderCustomer {
        id: "cus_orphan".to_string(),
        email: None,
        user_id: None,
    });
    let h = harness(provider);

    let payload = serde_json::json!({
        "id": "evt_orphan",
        "type": "customer.subscription.deleted",
        "created": 1_700_000_100,
        "data": {
            "object": {
                "id": "sub_orphan",
                "customer": "cus_orphan",
                "status": "canceled",
                "current_period_end": 1_702_592_000
            }
        },
        "livemode": false
    });

    let err = h.handler.handle(signed_command(payload)).await.unwrap_err();
    assert!(matches!(err, WebhookError::UnresolvableUser(_)));
    assert_eq!(err.status_code(), axum::http::StatusCode::OK);
    assert_eq!(h.store.processed_event_count().await, 0);
}

// ────────────────────────────────────────────────────────────────────────────
// Entitlement read side
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn activated_user_reads_as_subscribed() {
    let user = User {
        id: UserId::new(),
        email: "student@example.com".to_string(),
        role: UserRole::Student,
        referral_code: "READ01".to_string(),
        is_permanent_free: false,
        created_at: Timestamp::from_unix_secs(1_690_000_000),
    };
    let mut provider = MockPaymentProvider::new();
    provider.add_subscription(provider_subscription("sub_e", &user.id));
    let h = harness(provider);
    h.store.seed_user(user.clone()).await;

    let entitlement = GetEntitlementHandler::new(h.store.clone());
    let before = entitlement
        .handle(GetEntitlementQuery { user_id: user.id })
        .await
        .unwrap();
    assert!(!before.is_subscribed);

    h.handler
        .handle(signed_command(checkout_payload("evt_e", &user.id, "sub_e")))
        .await
        .unwrap();

    let after = entitlement
        .handle(GetEntitlementQuery { user_id: user.id })
        .await
        .unwrap();
    assert!(after.is_subscribed);
    assert_eq!(after.status, Some(SubscriptionStatus::Active));
    assert!(after.plan_id.is_some());
}
