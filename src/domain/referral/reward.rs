//! Referral milestone reward math.
//!
//! A referrer earns one reward for every fifth successful referral. The
//! count is always recomputed live from the current state of the referred
//! users' subscriptions, never accumulated, so referrals that later lapse
//! simply stop counting and no reward is granted retroactively.
//!
//! A reward is *newly earned* exactly when the recomputed total lands on a
//! positive multiple of the milestone. The recomputation runs after the
//! triggering event's writes inside the same transaction, so the total
//! already reflects the referral that just converted.

/// Number of successful referrals per reward.
pub const MILESTONE: u32 = 5;

/// Length of the reward extension (one provider-defined month).
pub const REWARD_EXTENSION_DAYS: i64 = 30;

/// Total rewards a referrer is entitled to at the given live count.
pub fn reward_count(successful: u32) -> u32 {
    successful / MILESTONE
}

/// Returns true if the recomputed count has just crossed a milestone.
pub fn newly_earned(successful: u32) -> bool {
    successful > 0 && successful % MILESTONE == 0
}
