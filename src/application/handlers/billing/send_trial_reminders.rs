//! SendTrialRemindersHandler - the daily trial-expiry reminder sweep.
//!
//! Scans trialing subscriptions whose period ends exactly 7 or exactly 1
//! day from the run date (date-only comparison) and emits one notification
//! plus one email per match. Failures are isolated per user: one bad row
//! never aborts the rest of the sweep. There is no retry queue - a reminder
//! missed on its day is lost, by policy.

use std::sync::Arc;

use chrono::NaiveDate;

use crate::domain::billing::Subscription;
use crate::domain::foundation::{DomainError, Timestamp};
use crate::domain::notification::Notification;
use crate::ports::{EmailSink, EntitlementStore};

/// Days-before-expiry values that trigger a reminder.
const REMINDER_OFFSETS: [i64; 2] = [7, 1];

/// Command to run one reminder sweep.
#[derive(Debug, Clone)]
pub struct SendTrialRemindersCommand {
    /// The sweep's reference date (today, UTC).
    pub today: NaiveDate,
}

/// Outcome counters for one sweep, for operator logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrialReminderReport {
    /// Trialing subscriptions inspected.
    pub scanned: usize,
    /// Reminders persisted (and emails submitted).
    pub sent: usize,
    /// Per-user failures, logged and skipped.
    pub failed: usize,
}

/// Handler running the reminder sweep.
pub struct SendTrialRemindersHandler {
    store: Arc<dyn EntitlementStore>,
    email: Arc<dyn EmailSink>,
}

impl SendTrialRemindersHandler {
    pub fn new(store: Arc<dyn EntitlementStore>, email: Arc<dyn EmailSink>) -> Self {
        Self { store, email }
    }

    pub async fn handle(
        &self,
        cmd: SendTrialRemindersCommand,
    ) -> Result<TrialReminderReport, DomainError> {
        // Range scan wide enough to cover the 7-day offset; exact-day
        // matching below keeps the date-only semantics in one place.
        let candidates = self.store.find_trialing_ending_within_days(8).await?;

        let mut report = TrialReminderReport {
            scanned: candidates.len(),
            ..Default::default()
        };

        for subscription in &candidates {
            let Some(days_left) = days_until_expiry(subscription, cmd.today) else {
                continue;
            };

            match self.remind(subscription, days_left).await {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        user_id = %subscription.user_id,
                        days_left,
                        error = %e,
                        "trial reminder failed; continuing sweep"
                    );
                }
            }
        }

        tracing::info!(
            scanned = report.scanned,
            sent = report.sent,
            failed = report.failed,
            "trial reminder sweep finished"
        );
        Ok(report)
    }

    async fn remind(&self, subscription: &Subscription, days_left: u32) -> Result<(), DomainError> {
        let notification =
            Notification::trial_reminder(subscription.user_id, days_left, Timestamp::now());
        self.store.insert_notification(&notification).await?;

        // Email delivery is best effort once the notification is persisted.
        if let Err(e) = self
            .email
            .send_to_user(
                &subscription.user_id,
                &notification.title,
                &notification.message,
            )
            .await
        {
            tracing::warn!(
                user_id = %subscription.user_id,
                error = %e,
                "trial reminder email failed"
            );
        }
        Ok(())
    }
}

/// Days between the run date and the subscription's end date, if the gap is
/// one of the reminder offsets.
fn days_until_expiry(subscription: &Subscription, today: NaiveDate) -> Option<u32> {
    let days = (subscription.current_period_end.date() - today).num_days();
    REMINDER_OFFSETS.contains(&days).then_some(days as u32)
}
