//! Scheduled background tasks.

mod trial_reminder_task;

pub use trial_reminder_task::TrialReminderTask;
