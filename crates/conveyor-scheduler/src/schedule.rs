use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::types::{Interval, Trigger};

/// Compute the UTC instant at which a job with `trigger` becomes due, given
/// the time it last ran (or was created).
///
/// Second/minute/hour intervals add one unit to `last_run`. Calendar
/// intervals jump to the start of the next day/week/month/quarter/year, so a
/// daily job created at 15:30 is due at 00:00 the next day and never drifts.
/// The optional time-of-day offset is added afterwards.
pub fn next_run(trigger: &Trigger, last_run: DateTime<Utc>) -> DateTime<Utc> {
    match trigger {
        Trigger::Once { at } => *at,
        Trigger::Recurring {
            interval,
            time_of_day,
        } => {
            let candidate = advance(*interval, last_run);
            match time_of_day {
                Some(offset) => candidate
                    .checked_add_signed(offset.as_duration())
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
                None => candidate,
            }
        }
    }
}

/// `true` once the trigger's next run is at or before `now`.
pub fn is_due(trigger: &Trigger, last_run: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    next_run(trigger, last_run) <= now
}

/// Advance `from` by one `interval`. Calendar units floor to the start of the
/// unit first and then add, which sidesteps day-of-month overflow (31 Jan
/// lands on 1 Feb, not 3 Mar). Out-of-range dates saturate to "never".
fn advance(interval: Interval, from: DateTime<Utc>) -> DateTime<Utc> {
    let date = from.date_naive();
    let next = match interval {
        Interval::Second => return add_or_max(from, Duration::seconds(1)),
        Interval::Minute => return add_or_max(from, Duration::minutes(1)),
        Interval::Hour => return add_or_max(from, Duration::hours(1)),
        Interval::Day => date.succ_opt(),
        Interval::Week => {
            let monday = date - Duration::days(date.weekday().num_days_from_monday() as i64);
            monday.checked_add_signed(Duration::days(7))
        }
        Interval::Month => first_of_month(date).and_then(|d| d.checked_add_months(Months::new(1))),
        Interval::Quarter => {
            let quarter_month = (date.month0() / 3) * 3 + 1;
            NaiveDate::from_ymd_opt(date.year(), quarter_month, 1)
                .and_then(|d| d.checked_add_months(Months::new(3)))
        }
        Interval::Year => NaiveDate::from_ymd_opt(date.year() + 1, 1, 1),
    };
    next.map(start_of_day).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn add_or_max(from: DateTime<Utc>, delta: Duration) -> DateTime<Utc> {
    from.checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn first_of_month(date: NaiveDate) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}
