//! Sunrise and sunset instants
//!
//! Approximate solar position (almanac method, official zenith). Accuracy is
//! within a couple of minutes at non-polar latitudes. Inputs are not range
//! checked; nonsense coordinates simply produce no event.
//!
//! Every conversion between the target calendar date and UTC derives its
//! offset from the date or instant at hand, so results stay correct across
//! daylight-saving transitions.

use chrono::{DateTime, Datelike, NaiveDate, TimeDelta, Utc};
use sa_core::ZoneRules;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Official zenith for sunrise/sunset, including refraction
const ZENITH: f64 = 90.8333;

const MINUTES_PER_DAY: i64 = 1440;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SunEventKind {
    Sunrise,
    Sunset,
}

impl fmt::Display for SunEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sunrise => f.write_str("sunrise"),
            Self::Sunset => f.write_str("sunset"),
        }
    }
}

/// UTC instant of a sun event on a local calendar date
///
/// Returns `None` when the sun does not rise or set that day (polar day or
/// night) or the coordinates produce no finite result.
pub fn sun_event_for_date(
    zone: &dyn ZoneRules,
    latitude: f64,
    longitude: f64,
    date: NaiveDate,
    kind: SunEventKind,
) -> Option<DateTime<Utc>> {
    let hours = universal_time_hours(latitude, longitude, date.ordinal(), kind)?;

    let midnight_utc = date.and_hms_opt(0, 0, 0)?.and_utc();
    let millis = (hours * 3_600_000.0).round() as i64;
    let mut instant = midnight_utc + TimeDelta::try_milliseconds(millis)?;

    // The UTC day of the event is not necessarily the local day; shift by a
    // day until the local date, using the offset at the result, matches.
    let local = zone.local_date(instant);
    if local < date {
        instant += TimeDelta::days(1);
    } else if local > date {
        instant -= TimeDelta::days(1);
    }

    Some(instant)
}

/// Next sun event strictly after `now`, shifted by `offset_minutes`
///
/// The offset may exceed a day in either direction. Each candidate date is
/// computed on its own, so a daylight-saving change between today and the
/// candidate does not leak into the result.
pub fn next_sun_event(
    zone: &dyn ZoneRules,
    latitude: f64,
    longitude: f64,
    offset_minutes: i64,
    kind: SunEventKind,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let offset = TimeDelta::try_minutes(offset_minutes)?;
    let today = zone.local_date(now);

    // A positive offset can push an earlier day's event past now
    let lookback = (offset_minutes.max(0) + MINUTES_PER_DAY - 1) / MINUTES_PER_DAY;
    let span = offset_minutes.abs() / MINUTES_PER_DAY + 2;

    let start = today.checked_sub_signed(TimeDelta::try_days(lookback)?)?;
    (0..=lookback + span)
        .filter_map(|day| start.checked_add_signed(TimeDelta::try_days(day)?))
        .filter_map(|date| sun_event_for_date(zone, latitude, longitude, date, kind))
        .map(|instant| instant + offset)
        .find(|instant| *instant > now)
}

fn universal_time_hours(latitude: f64, longitude: f64, day_of_year: u32, kind: SunEventKind) -> Option<f64> {
    let lng_hour = longitude / 15.0;
    let base_hour = match kind {
        SunEventKind::Sunrise => 6.0,
        SunEventKind::Sunset => 18.0,
    };
    let t = f64::from(day_of_year) + (base_hour - lng_hour) / 24.0;

    // Mean anomaly, then true longitude
    let m = 0.9856 * t - 3.289;
    let l = (m + 1.916 * sin_deg(m) + 0.020 * sin_deg(2.0 * m) + 282.634).rem_euclid(360.0);

    // Right ascension, in the same quadrant as the true longitude
    let mut ra = (0.91764 * tan_deg(l)).atan().to_degrees().rem_euclid(360.0);
    ra += (l / 90.0).floor() * 90.0 - (ra / 90.0).floor() * 90.0;
    ra /= 15.0;

    let sin_dec = 0.39782 * sin_deg(l);
    let cos_dec = sin_dec.asin().cos();

    let cos_h = (cos_deg(ZENITH) - sin_dec * sin_deg(latitude)) / (cos_dec * cos_deg(latitude));
    if !cos_h.is_finite() || !(-1.0..=1.0).contains(&cos_h) {
        return None;
    }

    let h = match kind {
        SunEventKind::Sunrise => 360.0 - cos_h.acos().to_degrees(),
        SunEventKind::Sunset => cos_h.acos().to_degrees(),
    } / 15.0;

    let local_mean_time = h + ra - 0.06571 * t - 6.622;
    let ut = (local_mean_time - lng_hour).rem_euclid(24.0);
    ut.is_finite().then_some(ut)
}

fn sin_deg(deg: f64) -> f64 {
    deg.to_radians().sin()
}

fn cos_deg(deg: f64) -> f64 {
    deg.to_radians().cos()
}

fn tan_deg(deg: f64) -> f64 {
    deg.to_radians().tan()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_zone::UsEastern;
    use chrono::{TimeZone, Timelike};

    const NYC: (f64, f64) = (40.7128, -74.0060);
    const TROMSO: (f64, f64) = (69.6496, 18.9560);

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn event(d: NaiveDate, kind: SunEventKind) -> DateTime<Utc> {
        sun_event_for_date(&UsEastern, NYC.0, NYC.1, d, kind).unwrap()
    }

    fn assert_near(actual: DateTime<Utc>, expected: DateTime<Utc>, minutes: i64) {
        let diff = (actual - expected).num_minutes().abs();
        assert!(diff <= minutes, "{actual} is {diff} minutes from {expected}");
    }

    fn local_hours(instant: DateTime<Utc>) -> f64 {
        let local = UsEastern.local_datetime(instant);
        f64::from(local.hour()) + f64::from(local.minute()) / 60.0
    }

    #[test]
    fn test_summer_solstice_new_york() {
        let d = date(2024, 6, 21);
        assert_near(event(d, SunEventKind::Sunrise), utc(2024, 6, 21, 9, 25), 3);
        // Sunset falls on the next UTC day but belongs to the 21st locally
        assert_near(event(d, SunEventKind::Sunset), utc(2024, 6, 22, 0, 31), 3);
    }

    #[test]
    fn test_sunrise_before_sunset() {
        for d in [date(2024, 1, 15), date(2024, 3, 10), date(2024, 6, 21), date(2024, 11, 3)] {
            assert!(event(d, SunEventKind::Sunrise) < event(d, SunEventKind::Sunset));
        }
    }

    #[test]
    fn test_spring_forward_has_no_stale_offset() {
        for kind in [SunEventKind::Sunrise, SunEventKind::Sunset] {
            let before = event(date(2024, 3, 9), kind);
            let after = event(date(2024, 3, 10), kind);

            // Roughly one day apart in absolute time
            assert_near(after, before + TimeDelta::days(1), 5);
            assert!((local_hours(after) - local_hours(before)).abs() < 3.0);
        }
    }

    #[test]
    fn test_fall_back_has_no_stale_offset() {
        for kind in [SunEventKind::Sunrise, SunEventKind::Sunset] {
            let before = event(date(2024, 11, 2), kind);
            let after = event(date(2024, 11, 3), kind);

            assert_near(after, before + TimeDelta::days(1), 5);
            assert!((local_hours(after) - local_hours(before)).abs() < 3.0);
        }
    }

    #[test]
    fn test_polar_day_and_night() {
        let zone = Utc;
        assert!(sun_event_for_date(&zone, TROMSO.0, TROMSO.1, date(2024, 6, 21), SunEventKind::Sunset)
            .is_none());
        assert!(sun_event_for_date(&zone, TROMSO.0, TROMSO.1, date(2024, 12, 21), SunEventKind::Sunrise)
            .is_none());
        assert!(sun_event_for_date(&zone, f64::NAN, 0.0, date(2024, 6, 21), SunEventKind::Sunrise)
            .is_none());
    }

    #[test]
    fn test_next_event_today_or_tomorrow() {
        let morning = utc(2024, 6, 21, 12, 0);
        let next = next_sun_event(&UsEastern, NYC.0, NYC.1, 0, SunEventKind::Sunset, morning).unwrap();
        assert_near(next, utc(2024, 6, 22, 0, 31), 3);

        // 21:00 local, today's sunset has passed
        let evening = utc(2024, 6, 22, 1, 0);
        let next = next_sun_event(&UsEastern, NYC.0, NYC.1, 0, SunEventKind::Sunset, evening).unwrap();
        assert_near(next, utc(2024, 6, 23, 0, 31), 3);
    }

    #[test]
    fn test_next_event_with_offsets() {
        let morning = utc(2024, 6, 21, 12, 0);

        let early = next_sun_event(&UsEastern, NYC.0, NYC.1, -60, SunEventKind::Sunset, morning).unwrap();
        assert_near(early, utc(2024, 6, 21, 23, 31), 3);

        // 25 hours after the sunset of the 20th
        let late = next_sun_event(&UsEastern, NYC.0, NYC.1, 1500, SunEventKind::Sunset, morning).unwrap();
        assert_near(late, utc(2024, 6, 22, 1, 31), 3);
        assert!(late > morning);
    }

    #[test]
    fn test_next_event_polar_never_fires() {
        let now = utc(2024, 6, 21, 12, 0);
        assert!(next_sun_event(&Utc, TROMSO.0, TROMSO.1, 0, SunEventKind::Sunset, now).is_none());
    }
}
