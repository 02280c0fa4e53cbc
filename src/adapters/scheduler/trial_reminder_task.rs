//! Daily trial reminder task.
//!
//! Runs the reminder sweep once a day at a fixed UTC hour. A try-lock guard
//! skips a firing if the previous sweep is somehow still running, so the
//! task never overlaps with itself.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::application::handlers::billing::{SendTrialRemindersCommand, SendTrialRemindersHandler};

/// Periodic wrapper around [`SendTrialRemindersHandler`].
pub struct TrialReminderTask {
    handler: SendTrialRemindersHandler,
    run_hour_utc: u32,
    running: Mutex<()>,
}

impl TrialReminderTask {
    pub fn new(handler: SendTrialRemindersHandler, run_hour_utc: u32) -> Self {
        Self {
            handler,
            run_hour_utc,
            running: Mutex::new(()),
        }
    }

    /// Spawns the daily loop onto the runtime.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let delay = delay_until_next_run(Utc::now(), self.run_hour_utc);
                tracing::debug!(seconds = delay.as_secs(), "trial reminder task sleeping");
                tokio::time::sleep(delay).await;
                self.run_once().await;
            }
        })
    }

    /// Runs one sweep, unless the previous one is still in flight.
    pub async fn run_once(&self) {
        let Ok(_guard) = self.running.try_lock() else {
            tracing::warn!("previous trial reminder sweep still running; skipping this firing");
            return;
        };

        let today = Utc::now().date_naive();
        match self
            .handler
            .handle(SendTrialRemindersCommand { today })
            .await
        {
            Ok(report) => {
                tracing::debug!(sent = report.sent, failed = report.failed, "trial reminder sweep done")
            }
            Err(e) => tracing::error!(error = %e, "trial reminder sweep failed"),
        }
    }
}

/// Time until the next occurrence of `hour:00` UTC, strictly in the future.
fn delay_until_next_run(now: DateTime<Utc>, hour: u32) -> Duration {
    let today_run = now
        .date_naive()
        .and_hms_opt(hour, 0, 0)
        .expect("hour validated by config")
        .and_utc();

    let next = if now < today_run {
        today_run
    } else {
        today_run + chrono::Duration::days(1)
    };

    (next - now).to_std().unwrap_or_default()
}
