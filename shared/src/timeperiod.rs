use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};

/// Day offset within a Monday-start week: Monday = 0 .. Sunday = 6.
pub fn day_index(d: &DateTime<Utc>) -> usize {
    d.weekday().num_days_from_monday() as usize
}

pub fn is_same_day(a: &DateTime<Utc>, b: &DateTime<Utc>) -> bool {
    a.date_naive() == b.date_naive()
}

/// True iff `a` falls on the calendar day exactly one before `b`.
pub fn is_yesterday(a: &DateTime<Utc>, b: &DateTime<Utc>) -> bool {
    b.date_naive()
        .pred_opt()
        .is_some_and(|yesterday| a.date_naive() == yesterday)
}

/// Monday of the week containing `d`. Sundays belong to the week that
/// started six days earlier, not the next one.
pub fn week_start(d: &DateTime<Utc>) -> NaiveDate {
    d.date_naive() - Days::new(day_index(d) as u64)
}

pub fn same_week(a: &DateTime<Utc>, b: &DateTime<Utc>) -> bool {
    week_start(a) == week_start(b)
}

/// Streak-based XP multiplier: 1.0 for streaks of a single day or less,
/// then 1 + streak/10 capped at 2.0 from a ten-day streak onward.
pub fn multiplier(streak: u32) -> f64 {
    if streak <= 1 {
        return 1.0;
    }
    (1.0 + streak as f64 / 10.0).min(2.0)
}

/// Base XP scaled by the streak multiplier, rounded to the nearest point.
pub fn scaled_xp(base_xp: u32, streak: u32) -> u32 {
    (base_xp as f64 * multiplier(streak)).round() as u32
}
