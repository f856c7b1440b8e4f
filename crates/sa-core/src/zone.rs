//! Wall-clock zone rules
//!
//! Everything that turns a calendar date or a wall time into an instant goes
//! through [`ZoneRules`]. Offsets are always derived from the date or instant
//! being converted, never from a cached reference date, so daylight-saving
//! transitions are handled per conversion.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Utc};

/// Conversion between UTC instants and local wall-clock time
pub trait ZoneRules: Send + Sync {
    /// Local wall-clock time of an instant
    fn local_datetime(&self, instant: DateTime<Utc>) -> NaiveDateTime;

    /// Instant for a local wall-clock time
    ///
    /// A wall time that falls into a spring-forward gap is shifted one hour
    /// forward; an ambiguous wall time resolves to its earliest instant.
    fn resolve_local(&self, local: NaiveDateTime) -> Option<DateTime<Utc>>;

    /// Local calendar date of an instant
    fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        self.local_datetime(instant).date()
    }
}

impl<Tz> ZoneRules for Tz
where
    Tz: TimeZone + Send + Sync,
    Tz::Offset: Send + Sync,
{
    fn local_datetime(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(self).naive_local()
    }

    fn resolve_local(&self, local: NaiveDateTime) -> Option<DateTime<Utc>> {
        self.from_local_datetime(&local)
            .earliest()
            .or_else(|| {
                self.from_local_datetime(&(local + TimeDelta::hours(1)))
                    .earliest()
            })
            .map(|dt| dt.with_timezone(&Utc))
    }
}
