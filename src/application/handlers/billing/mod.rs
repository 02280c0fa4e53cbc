//! Billing command and query handlers.

mod get_entitlement;
mod process_webhook;
mod send_trial_reminders;

pub use get_entitlement::{EntitlementView, GetEntitlementHandler, GetEntitlementQuery};
pub use process_webhook::{ProcessWebhookCommand, ProcessWebhookHandler, ProcessWebhookResult};
pub use send_trial_reminders::{
    SendTrialRemindersCommand, SendTrialRemindersHandler, TrialReminderReport,
};
