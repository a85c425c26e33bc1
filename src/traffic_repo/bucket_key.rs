// Bucket key derivation: sample instant -> window start, per granularity.
// Pure; boundaries follow the wall clock of the sample's time zone.

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveTime, TimeDelta, TimeZone, Timelike, Utc};

use crate::models::{Granularity, TimePolicy};

const FIVE_MINUTES: u32 = 5;

/// Start of the window containing `now`, in `now`'s own time zone.
///
/// Five-minute windows use floor: 10:04:59 belongs to 10:00, 10:05:00 starts a new window.
/// Five-minute and hour windows are stepped back from `now` itself, keeping its offset, so the two passes
/// through a repeated DST hour land in distinct windows that each contain their sample.
pub fn bucket_start<Tz: TimeZone>(granularity: Granularity, now: &DateTime<Tz>) -> DateTime<Tz> {
    let sub_minute = TimeDelta::seconds(now.second() as i64)
        + TimeDelta::nanoseconds(now.nanosecond() as i64);
    let date = now.date_naive();
    match granularity {
        Granularity::FiveMinute => {
            now.clone() - TimeDelta::minutes((now.minute() % FIVE_MINUTES) as i64) - sub_minute
        }
        Granularity::Hour => now.clone() - TimeDelta::minutes(now.minute() as i64) - sub_minute,
        Granularity::Day => localize(&now.timezone(), date),
        Granularity::Month => localize(&now.timezone(), date - TimeDelta::days(date.day0() as i64)),
        Granularity::Year => {
            localize(&now.timezone(), date - TimeDelta::days(date.ordinal0() as i64))
        }
    }
}

/// Window start as a UTC epoch-millisecond key, with boundaries taken from `policy`'s wall clock.
pub fn bucket_start_ms(policy: TimePolicy, granularity: Granularity, now: DateTime<Utc>) -> i64 {
    match policy {
        TimePolicy::Utc => bucket_start(granularity, &now).timestamp_millis(),
        TimePolicy::Local => {
            bucket_start(granularity, &now.with_timezone(&Local)).timestamp_millis()
        }
    }
}

/// All five keys for one sample. Callers derive once per sample so every table agrees on `now`.
pub fn bucket_starts(policy: TimePolicy, now: DateTime<Utc>) -> [(Granularity, i64); 5] {
    Granularity::ALL.map(|g| (g, bucket_start_ms(policy, g, now)))
}

/// Local midnight of `date` as an instant. Ambiguous (DST fall-back) picks the earlier instant;
/// nonexistent (DST gap) moves to the first valid minute after the gap.
fn localize<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Tz> {
    let wall = date.and_time(NaiveTime::MIN);
    if let Some(dt) = tz.from_local_datetime(&wall).earliest() {
        return dt;
    }
    (1..=180)
        .find_map(|m| tz.from_local_datetime(&(wall + TimeDelta::minutes(m))).earliest())
        .unwrap_or_else(|| tz.from_utc_datetime(&wall))
}
