use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use shared::{
    day_index, is_same_day, is_yesterday, same_week, scaled_xp, StatsRecord, DAILY_LOGIN_ACTIVITY,
    DAILY_LOGIN_XP, DAYS_IN_WEEK,
};

use crate::store::RolloverWrite;

/// Day-1 payload written right after a fresh record is created: a one-day
/// streak, the login bonus in every XP counter, and today marked in the
/// weekly log.
pub fn day_one_write(now: DateTime<Utc>) -> RolloverWrite {
    let mut weekly_log = [false; DAYS_IN_WEEK];
    weekly_log[day_index(&now)] = true;

    RolloverWrite {
        streak: 1,
        xp_today: DAILY_LOGIN_XP,
        weekly_xp: DAILY_LOGIN_XP,
        total_xp: DAILY_LOGIN_XP,
        weekly_log,
        completed_today: BTreeSet::from([DAILY_LOGIN_ACTIVITY.to_owned()]),
    }
}

/// Decides whether `current` needs a new-day rollover at `now`, and builds
/// the full write if so. Returns `None` when the record was already
/// reconciled today, which is what makes the whole pass idempotent.
///
/// The streak advances only when the last reconciliation was exactly
/// yesterday; any longer gap resets it to 1. The daily bonus is scaled by
/// the multiplier of the streak that results from this rollover.
pub fn plan_rollover(current: &StatsRecord, now: DateTime<Utc>) -> Option<RolloverWrite> {
    if let Some(last_active) = current.last_active {
        if is_same_day(&last_active, &now) {
            return None;
        }
    }

    let streak_continues = current
        .last_active
        .is_some_and(|last| is_yesterday(&last, &now));
    let streak = if streak_continues {
        current.streak + 1
    } else {
        1
    };

    let new_week = current
        .last_active
        .is_none_or(|last| !same_week(&last, &now));

    let gained = scaled_xp(DAILY_LOGIN_XP, streak);
    let weekly_xp = if new_week { 0 } else { current.weekly_xp } + gained;

    // A new week wipes the log before today is marked; otherwise earlier
    // days of the current week stay visible.
    let mut weekly_log = if new_week {
        [false; DAYS_IN_WEEK]
    } else {
        current.weekly_log
    };
    weekly_log[day_index(&now)] = true;

    Some(RolloverWrite {
        streak,
        xp_today: gained,
        weekly_xp,
        total_xp: current.total_xp + gained,
        weekly_log,
        completed_today: BTreeSet::from([DAILY_LOGIN_ACTIVITY.to_owned()]),
    })
}
