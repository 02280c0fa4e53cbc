//! PostgreSQL implementation of the entitlement store.
//!
//! One sqlx transaction backs each [`EntitlementTxn`]; dropping the
//! transaction without commit rolls back, which is exactly the contract the
//! port requires. The processed-event claim and the class insert both rely
//! on `ON CONFLICT DO NOTHING` against unique keys so concurrent deliveries
//! race safely, and `find_subscription_for_update` takes a row lock so
//! events for the same user serialize inside the database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::billing::{Subscription, SubscriptionStatus, SubscriptionUpsert};
use crate::domain::classroom::ClassRoom;
use crate::domain::foundation::{
    DomainError, ErrorCode, PlanId, ReferralId, SubscriptionId, Timestamp, UserId,
};
use crate::domain::notification::Notification;
use crate::domain::referral::Referral;
use crate::domain::user::{User, UserRole};
use crate::ports::{EntitlementStore, EntitlementTxn, InsertOutcome};

/// PostgreSQL implementation of the EntitlementStore port.
pub struct PostgresEntitlementStore {
    pool: PgPool,
}

impl PostgresEntitlementStore {
    /// Creates a new store with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Row types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    user_id: Uuid,
    plan_id: Option<Uuid>,
    status: String,
    current_period_start: DateTime<Utc>,
    current_period_end: DateTime<Utc>,
    payment_provider: Option<String>,
    invoice_id: Option<String>,
    provider_event_ts: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = DomainError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Subscription {
            id: SubscriptionId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            plan_id: row.plan_id.map(PlanId::from_uuid),
            status: parse_status(&row.status)?,
            current_period_start: Timestamp::from_datetime(row.current_period_start),
            current_period_end: Timestamp::from_datetime(row.current_period_end),
            payment_provider: row.payment_provider,
            invoice_id: row.invoice_id,
            provider_event_ts: row.provider_event_ts,
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    role: String,
    referral_code: String,
    is_permanent_free: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = DomainError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = UserRole::parse(&row.role).ok_or_else(|| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Invalid role value: {}", row.role),
            )
        })?;
        Ok(User {
            id: UserId::from_uuid(row.id),
            email: row.email,
            role,
            referral_code: row.referral_code,
            is_permanent_free: row.is_permanent_free,
            created_at: Timestamp::from_datetime(row.created_at),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ReferralRow {
    id: Uuid,
    referrer_user_id: Uuid,
    referred_user_id: Uuid,
    created_at: DateTime<Utc>,
}

impl From<ReferralRow> for Referral {
    fn from(row: ReferralRow) -> Self {
        Referral {
            id: ReferralId::from_uuid(row.id),
            referrer_user_id: UserId::from_uuid(row.referrer_user_id),
            referred_user_id: UserId::from_uuid(row.referred_user_id),
            created_at: Timestamp::from_datetime(row.created_at),
        }
    }
}

fn parse_status(s: &str) -> Result<SubscriptionStatus, DomainError> {
    match s {
        "trialing" => Ok(SubscriptionStatus::Trialing),
        "active" => Ok(SubscriptionStatus::Active),
        "past_due" => Ok(SubscriptionStatus::PastDue),
        "canceled" => Ok(SubscriptionStatus::Canceled),
        _ => Err(DomainError::new(
            ErrorCode::DatabaseError,
            format!("Invalid status value: {}", s),
        )),
    }
}

fn db_err(e: sqlx::Error, context: &str) -> DomainError {
    DomainError::database(format!("{}: {}", context, e))
}

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, plan_id, status, current_period_start, \
     current_period_end, payment_provider, invoice_id, provider_event_ts, created_at, updated_at";

// ────────────────────────────────────────────────────────────────────────────
// Store (pool-level reads and writes)
// ────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl EntitlementStore for PostgresEntitlementStore {
    async fn begin(&self) -> Result<Box<dyn EntitlementTxn>, DomainError> {
        let txn = self
            .pool
            .begin()
            .await
            .map_err(|e| db_err(e, "Failed to begin transaction"))?;
        Ok(Box::new(PostgresEntitlementTxn { txn }))
    }

    async fn subscriptions_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<Subscription>, DomainError> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err(e, "Failed to load subscriptions"))?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    async fn find_user(&self, user_id: &UserId) -> Result<Option<User>, DomainError> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, email, role, referral_code, is_permanent_free, created_at \
             FROM users WHERE id = $1",
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err(e, "Failed to load user"))?;

        row.map(User::try_from).transpose()
    }

    async fn find_trialing_ending_within_days(
        &self,
        days: u32,
    ) -> Result<Vec<Subscription>, DomainError> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions \
             WHERE status = 'trialing' \
               AND current_period_end <= now() + make_interval(days => $1) \
             ORDER BY current_period_end ASC",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(days as i32)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err(e, "Failed to load ending trials"))?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO notifications (id, user_id, title, message, kind, read, sent_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(notification.id.as_uuid())
        .bind(notification.user_id.as_uuid())
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.kind.as_str())
        .bind(notification.read)
        .bind(notification.sent_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| db_err(e, "Failed to insert notification"))?;
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transaction
// ────────────────────────────────────────────────────────────────────────────

struct PostgresEntitlementTxn {
    txn: Transaction<'static, Postgres>,
}

#[async_trait]
impl EntitlementTxn for PostgresEntitlementTxn {
    async fn claim_event(
        &mut self,
        event_id: &str,
        kind: &str,
    ) -> Result<InsertOutcome, DomainError> {
        let result = sqlx::query(
            "INSERT INTO webhook_events (event_id, kind, received_at) \
             VALUES ($1, $2, now()) \
             ON CONFLICT (event_id) DO NOTHING",
        )
        .bind(event_id)
        .bind(kind)
        .execute(&mut *self.txn)
        .await
        .map_err(|e| db_err(e, "Failed to claim webhook event"))?;

        if result.rows_affected() == 1 {
            Ok(InsertOutcome::Inserted)
        } else {
            Ok(InsertOutcome::AlreadyExists)
        }
    }

    async fn find_subscription_for_update(
        &mut self,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, DomainError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1 FOR UPDATE",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id.as_uuid())
        .fetch_optional(&mut *self.txn)
        .await
        .map_err(|e| db_err(e, "Failed to lock subscription"))?;

        row.map(Subscription::try_from).transpose()
    }

    async fn upsert_subscription(
        &mut self,
        upsert: &SubscriptionUpsert,
    ) -> Result<Subscription, DomainError> {
        let row: SubscriptionRow = sqlx::query_as(&format!(
            "INSERT INTO subscriptions \
               (id, user_id, plan_id, status, current_period_start, current_period_end, \
                payment_provider, invoice_id, provider_event_ts, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now(), now()) \
             ON CONFLICT (user_id) DO UPDATE SET \
               plan_id = EXCLUDED.plan_id, \
               status = EXCLUDED.status, \
               current_period_start = EXCLUDED.current_period_start, \
               current_period_end = EXCLUDED.current_period_end, \
               payment_provider = EXCLUDED.payment_provider, \
               invoice_id = EXCLUDED.invoice_id, \
               provider_event_ts = EXCLUDED.provider_event_ts, \
               updated_at = now() \
             RETURNING {}",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(SubscriptionId::new().as_uuid())
        .bind(upsert.user_id.as_uuid())
        .bind(upsert.plan_id.as_uuid())
        .bind(upsert.status.as_str())
        .bind(upsert.current_period_start.as_datetime())
        .bind(upsert.current_period_end.as_datetime())
        .bind(&upsert.payment_provider)
        .bind(&upsert.invoice_id)
        .bind(upsert.provider_event_ts)
        .fetch_one(&mut *self.txn)
        .await
        .map_err(|e| db_err(e, "Failed to upsert subscription"))?;

        Subscription::try_from(row)
    }

    async fn update_remote_state(
        &mut self,
        user_id: &UserId,
        status: SubscriptionStatus,
        period_end: Timestamp,
        event_ts: i64,
    ) -> Result<u64, DomainError> {
        let result = sqlx::query(
            "UPDATE subscriptions SET \
               status = $2, \
               current_period_end = $3, \
               provider_event_ts = $4, \
               updated_at = now() \
             WHERE user_id = $1",
        )
        .bind(user_id.as_uuid())
        .bind(status.as_str())
        .bind(period_end.as_datetime())
        .bind(event_ts)
        .execute(&mut *self.txn)
        .await
        .map_err(|e| db_err(e, "Failed to update subscription"))?;

        Ok(result.rows_affected())
    }

    async fn insert_class_room(&mut self, class: &ClassRoom) -> Result<InsertOutcome, DomainError> {
        let result = sqlx::query(
            "INSERT INTO class_rooms \
               (id, teacher_user_id, name, join_code, checkout_session_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (checkout_session_id) DO NOTHING",
        )
        .bind(class.id.as_uuid())
        .bind(class.teacher_user_id.as_uuid())
        .bind(&class.name)
        .bind(&class.join_code)
        .bind(&class.checkout_session_id)
        .bind(class.created_at.as_datetime())
        .execute(&mut *self.txn)
        .await
        .map_err(|e| db_err(e, "Failed to insert class room"))?;

        if result.rows_affected() == 1 {
            Ok(InsertOutcome::Inserted)
        } else {
            Ok(InsertOutcome::AlreadyExists)
        }
    }

    async fn find_referrer_of(
        &mut self,
        user_id: &UserId,
    ) -> Result<Option<Referral>, DomainError> {
        let row: Option<ReferralRow> = sqlx::query_as(
            "SELECT id, referrer_user_id, referred_user_id, created_at \
             FROM referrals WHERE referred_user_id = $1",
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&mut *self.txn)
        .await
        .map_err(|e| db_err(e, "Failed to load referral"))?;

        Ok(row.map(Referral::from))
    }

    async fn count_successful_referrals(
        &mut self,
        referrer_user_id: &UserId,
    ) -> Result<u32, DomainError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM referrals r \
             JOIN subscriptions s ON s.user_id = r.referred_user_id \
             WHERE r.referrer_user_id = $1 \
               AND s.status IN ('active', 'trialing') \
               AND s.plan_id IS NOT NULL",
        )
        .bind(referrer_user_id.as_uuid())
        .fetch_one(&mut *self.txn)
        .await
        .map_err(|e| db_err(e, "Failed to count referrals"))?;

        Ok(count as u32)
    }

    async fn find_active_subscription(
        &mut self,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, DomainError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions \
             WHERE user_id = $1 AND status = 'active' \
             ORDER BY current_period_start DESC \
             LIMIT 1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id.as_uuid())
        .fetch_optional(&mut *self.txn)
        .await
        .map_err(|e| db_err(e, "Failed to load active subscription"))?;

        row.map(Subscription::try_from).transpose()
    }

    async fn extend_period(
        &mut self,
        subscription_id: &SubscriptionId,
        new_period_end: Timestamp,
    ) -> Result<(), DomainError> {
        sqlx::query(
            "UPDATE subscriptions SET current_period_end = $2, updated_at = now() WHERE id = $1",
        )
        .bind(subscription_id.as_uuid())
        .bind(new_period_end.as_datetime())
        .execute(&mut *self.txn)
        .await
        .map_err(|e| db_err(e, "Failed to extend period"))?;
        Ok(())
    }

    async fn insert_notification(
        &mut self,
        notification: &Notification,
    ) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO notifications (id, user_id, title, message, kind, read, sent_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(notification.id.as_uuid())
        .bind(notification.user_id.as_uuid())
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.kind.as_str())
        .bind(notification.read)
        .bind(notification.sent_at.as_datetime())
        .execute(&mut *self.txn)
        .await
        .map_err(|e| db_err(e, "Failed to insert notification"))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DomainError> {
        self.txn
            .commit()
            .await
            .map_err(|e| db_err(e, "Failed to commit transaction"))
    }

    async fn rollback(self: Box<Self>) -> Result<(), DomainError> {
        self.txn
            .rollback()
            .await
            .map_err(|e| db_err(e, "Failed to roll back transaction"))
    }
}
