/// Market session and minute-bucket utilities (all wall-clock math in IST)
use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use chrono_tz::Asia::Kolkata;

const MARKET_OPEN_SECS: u32 = 9 * 3600 + 15 * 60;
const MARKET_CLOSE_SECS: u32 = 15 * 3600 + 30 * 60;
/// Ticks stamped anywhere inside the 15:30 minute are still part of the session
const LAST_TICK_SECS: u32 = MARKET_CLOSE_SECS + 59;
const AGGREGATION_START_SECS: u32 = 9 * 3600 + 30 * 60;

fn ist_seconds_of_day(ts: DateTime<Utc>) -> u32 {
    ts.with_timezone(&Kolkata).num_seconds_from_midnight()
}

/// Absolute IST minute of the day (hour * 60 + minute)
pub fn minute_of_day(ts: DateTime<Utc>) -> u32 {
    let ist = ts.with_timezone(&Kolkata);
    ist.hour() * 60 + ist.minute()
}

/// Seconds into the minute; IST is a whole-minute offset so this is zone independent
pub fn second_of_minute(ts: DateTime<Utc>) -> u32 {
    ts.second()
}

/// Start of the minute bucket containing `ts`
pub fn floor_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts - Duration::seconds(ts.second() as i64) - Duration::nanoseconds(ts.nanosecond() as i64)
}

/// IST calendar date of `ts`
pub fn ist_date(ts: DateTime<Utc>) -> NaiveDate {
    ts.with_timezone(&Kolkata).date_naive()
}

/// Whether a tick stamped `ts` belongs to the trading session (09:15:00 - 15:30:59 IST)
pub fn is_within_tick_window(ts: DateTime<Utc>) -> bool {
    let sod = ist_seconds_of_day(ts);
    (MARKET_OPEN_SECS..=LAST_TICK_SECS).contains(&sod)
}

/// Check if market is open (09:15 <= t < 15:30 IST)
pub fn is_market_open(now: DateTime<Utc>) -> bool {
    let sod = ist_seconds_of_day(now);
    (MARKET_OPEN_SECS..MARKET_CLOSE_SECS).contains(&sod)
}

/// Check if the session is over for the day
pub fn is_after_close(now: DateTime<Utc>) -> bool {
    ist_seconds_of_day(now) >= MARKET_CLOSE_SECS
}

/// Window in which downstream aggregation may run: by 09:30 every intraday
/// candle size up to 15 minutes has at least one complete bar.
pub fn is_aggregation_window(now: DateTime<Utc>) -> bool {
    let sod = ist_seconds_of_day(now);
    (AGGREGATION_START_SECS..MARKET_CLOSE_SECS).contains(&sod)
}
