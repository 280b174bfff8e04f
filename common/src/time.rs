//! Millisecond clock helpers. Persistence stores UTC epoch milliseconds; the
//! domain works with `chrono::DateTime<Utc>`.

use chrono::{DateTime, Days, NaiveDate, TimeDelta, TimeZone, Utc};

pub fn to_ms(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// Converts stored epoch milliseconds back into a UTC timestamp.
/// Returns `None` for values chrono cannot represent.
pub fn from_ms(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// `ts` minus `days` whole days, saturating at the earliest representable
/// instant. Windows wider than chrono's range simply cover everything.
pub fn days_before(ts: DateTime<Utc>, days: u64) -> DateTime<Utc> {
    i64::try_from(days)
        .ok()
        .and_then(TimeDelta::try_days)
        .and_then(|d| ts.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Calendar counterpart of [`days_before`], saturating at `NaiveDate::MIN`.
pub fn date_days_before(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_sub_days(Days::new(days)).unwrap_or(NaiveDate::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ms_round_trip_preserves_millisecond_precision() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap()
            + chrono::Duration::milliseconds(589);
        assert_eq!(from_ms(to_ms(ts)), Some(ts));
    }

    #[test]
    fn from_ms_rejects_out_of_range() {
        assert!(from_ms(i64::MAX).is_none());
    }

    #[test]
    fn days_before_subtracts_whole_days() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap();
        assert_eq!(
            days_before(ts, 30),
            Utc.with_ymd_and_hms(2026, 2, 12, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn days_before_saturates_on_huge_windows() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap();
        assert_eq!(days_before(ts, 100_000_000), DateTime::<Utc>::MIN_UTC);
        assert_eq!(days_before(ts, u64::from(u32::MAX)), DateTime::<Utc>::MIN_UTC);
        assert_eq!(days_before(ts, u64::MAX), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn date_days_before_saturates() {
        let d = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
        assert_eq!(date_days_before(d, 13), NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
        assert_eq!(date_days_before(d, u64::from(u32::MAX)), NaiveDate::MIN);
    }
}
