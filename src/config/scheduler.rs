//! Scheduler configuration

use serde::Deserialize;

use super::error::ValidationError;

/// Trial reminder scheduler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Whether the daily trial reminder task runs at all
    #[serde(default = "default_enabled")]
    pub trial_reminders_enabled: bool,

    /// Hour of day (UTC) at which the reminder sweep runs
    #[serde(default = "default_reminder_hour")]
    pub reminder_hour_utc: u32,
}

impl SchedulerConfig {
    /// Validate scheduler configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.reminder_hour_utc > 23 {
            return Err(ValidationError::InvalidReminderHour);
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            trial_reminders_enabled: default_enabled(),
            reminder_hour_utc: default_reminder_hour(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_reminder_hour() -> u32 {
    8
}
