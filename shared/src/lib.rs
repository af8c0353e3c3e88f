use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod timeperiod;

pub use timeperiod::*;

pub type UserId = String;
pub type ActivityId = String;

/// Base XP paid for the daily login bonus, before the streak multiplier.
pub const DAILY_LOGIN_XP: u32 = 50;
/// Activity id under which the daily login bonus is recorded.
pub const DAILY_LOGIN_ACTIVITY: &str = "dailyLogin";

pub const DAYS_IN_WEEK: usize = 7;

/// Per-user stats document. One exists per user once the first
/// reconciliation has run; before that the store has no record at all.
///
/// Field names match the document-store schema.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsRecord {
    pub streak: u32,
    pub xp_today: u32,
    pub weekly_xp: u32,
    pub total_xp: u32,
    /// Monday = index 0 .. Sunday = index 6, `true` for days the user was
    /// active within the current Monday-start week.
    pub weekly_log: [bool; DAYS_IN_WEEK],
    /// Server-assigned time of the last reconciliation write. `None` marks
    /// a record that was created but never initialized.
    pub last_active: Option<DateTime<Utc>>,
    /// Activities that already paid out today; cleared on every rollover.
    pub completed_today: BTreeSet<ActivityId>,
}

impl StatsRecord {
    pub fn has_completed(&self, activity: &str) -> bool {
        self.completed_today.contains(activity)
    }
}
