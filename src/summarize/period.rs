//! Calendar period arithmetic.
//!
//! Daily periods are single calendar days. Weekly periods are the 7 days
//! ending on Sunday. Monthly and quarterly periods follow calendar month
//! and quarter boundaries. All bounds are half-open [start, end) at UTC
//! midnight.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};

use crate::store::memories::MemoryKind;

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn add_months(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_add_months(chrono::Months::new(months))
        .unwrap_or(date)
}

/// The [start, end) bounds of the period of `kind` containing `date`.
pub fn period_bounds(kind: MemoryKind, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let (start, end) = match kind {
        MemoryKind::Daily => (date, date + Duration::days(1)),
        MemoryKind::Weekly => {
            let start = date - Duration::days(date.weekday().num_days_from_monday() as i64);
            (start, start + Duration::days(7))
        }
        MemoryKind::Monthly => {
            let start = month_start(date);
            (start, add_months(start, 1))
        }
        MemoryKind::Quarterly => {
            let quarter_month = ((date.month0() / 3) * 3) + 1;
            let start = NaiveDate::from_ymd_opt(date.year(), quarter_month, 1)
                .unwrap_or_else(|| month_start(date));
            (start, add_months(start, 3))
        }
    };
    (day_start(start), day_start(end))
}

/// Every complete period of `kind` touching [from, to], oldest first.
/// A period still in progress at `now` is excluded; it will be picked up
/// once it has closed.
pub fn walk_periods(
    kind: MemoryKind,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut periods = Vec::new();
    let mut cursor = from.date_naive();

    loop {
        let (start, end) = period_bounds(kind, cursor);
        if start > to {
            break;
        }
        if end <= now {
            periods.push((start, end));
        }
        cursor = end.date_naive();
    }

    periods
}
