//! In-app notification record.
//!
//! Created by the reward calculator and the trial reminder sweep; the UI
//! layer owns reading and the "mark read" mutation.

use crate::domain::foundation::{NotificationId, Timestamp, UserId};
use serde::{Deserialize, Serialize};

/// What produced a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ReferralReward,
    TrialReminder,
}

impl NotificationKind {
    /// Database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReferralReward => "referral_reward",
            Self::TrialReminder => "trial_reminder",
        }
    }

    /// Parses the database representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "referral_reward" => Some(Self::ReferralReward),
            "trial_reminder" => Some(Self::TrialReminder),
            _ => None,
        }
    }
}

/// A message for a user, persisted as a side effect of billing events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub read: bool,
    pub sent_at: Timestamp,
}

impl Notification {
    /// Notification for a referrer who just hit a milestone.
    pub fn referral_reward(user_id: UserId, total_referrals: u32, sent_at: Timestamp) -> Self {
        Self {
            id: NotificationId::new(),
            user_id,
            title: "You earned a referral reward!".to_string(),
            message: format!(
                "{} friends have joined Studyhall through you. \
                 We added a free month to your subscription - thank you!",
                total_referrals
            ),
            kind: NotificationKind::ReferralReward,
            read: false,
            sent_at,
        }
    }

    /// Reminder that a trial ends in `days_left` days.
    pub fn trial_reminder(user_id: UserId, days_left: u32, sent_at: Timestamp) -> Self {
        let when = if days_left == 1 {
            "tomorrow".to_string()
        } else {
            format!("in {} days", days_left)
        };
        Self {
            id: NotificationId::new(),
            user_id,
            title: "Your trial is ending soon".to_string(),
            message: format!(
                "Your Studyhall trial ends {}. \
                 Subscribe to keep full access to your courses.",
                when
            ),
            kind: NotificationKind::TrialReminder,
            read: false,
            sent_at,
        }
    }
}
