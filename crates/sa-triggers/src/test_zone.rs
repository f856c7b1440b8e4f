//! US Eastern time zone for tests
//!
//! Daylight saving from the second Sunday of March, 02:00 EST, to the first
//! Sunday of November, 02:00 EDT (2007 rules).

use chrono::{
    Datelike, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Weekday,
};

const EST: i32 = -5 * 3600;
const EDT: i32 = -4 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsEastern;

fn dst_window_utc(year: i32) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let start = NaiveDate::from_weekday_of_month_opt(year, 3, Weekday::Sun, 2)?;
    let end = NaiveDate::from_weekday_of_month_opt(year, 11, Weekday::Sun, 1)?;
    Some((start.and_hms_opt(7, 0, 0)?, end.and_hms_opt(6, 0, 0)?))
}

fn offset(seconds: i32) -> FixedOffset {
    FixedOffset::east_opt(seconds).unwrap()
}

impl TimeZone for UsEastern {
    type Offset = FixedOffset;

    fn from_offset(_offset: &FixedOffset) -> Self {
        UsEastern
    }

    fn offset_from_local_date(&self, local: &NaiveDate) -> LocalResult<FixedOffset> {
        self.offset_from_local_datetime(&local.and_time(NaiveTime::MIN))
    }

    fn offset_from_local_datetime(&self, local: &NaiveDateTime) -> LocalResult<FixedOffset> {
        let as_edt = self.offset_from_utc_datetime(&(*local - TimeDelta::seconds(i64::from(EDT))));
        let as_est = self.offset_from_utc_datetime(&(*local - TimeDelta::seconds(i64::from(EST))));

        let edt_valid = as_edt == offset(EDT);
        let est_valid = as_est == offset(EST);
        match (edt_valid, est_valid) {
            (true, true) => LocalResult::Ambiguous(offset(EDT), offset(EST)),
            (true, false) => LocalResult::Single(offset(EDT)),
            (false, true) => LocalResult::Single(offset(EST)),
            (false, false) => LocalResult::None,
        }
    }

    fn offset_from_utc_date(&self, utc: &NaiveDate) -> FixedOffset {
        self.offset_from_utc_datetime(&utc.and_time(NaiveTime::MIN))
    }

    fn offset_from_utc_datetime(&self, utc: &NaiveDateTime) -> FixedOffset {
        match dst_window_utc(utc.year()) {
            Some((start, end)) if *utc >= start && *utc < end => offset(EDT),
            _ => offset(EST),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_core::ZoneRules;

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn test_offsets_around_transitions() {
        let winter = UsEastern.resolve_local(local(2024, 1, 10, 12, 0)).unwrap();
        assert_eq!(winter.to_rfc3339(), "2024-01-10T17:00:00+00:00");

        let summer = UsEastern.resolve_local(local(2024, 7, 10, 12, 0)).unwrap();
        assert_eq!(summer.to_rfc3339(), "2024-07-10T16:00:00+00:00");
    }

    #[test]
    fn test_gap_shifts_forward() {
        // 02:30 does not exist on 2024-03-10
        let shifted = UsEastern.resolve_local(local(2024, 3, 10, 2, 30)).unwrap();
        assert_eq!(UsEastern.local_datetime(shifted), local(2024, 3, 10, 3, 30));
    }

    #[test]
    fn test_overlap_resolves_earliest() {
        // 01:30 happens twice on 2024-11-03; the EDT instance comes first
        let first = UsEastern.resolve_local(local(2024, 11, 3, 1, 30)).unwrap();
        assert_eq!(first.to_rfc3339(), "2024-11-03T05:30:00+00:00");
    }
}
